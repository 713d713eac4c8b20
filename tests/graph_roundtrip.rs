//! Интеграционные тесты цикла flatten/unflatten: круговой обход,
//! разделяемые ссылки, циклы, pytree и запись состояния обратно.

use rustyosg::graph::{
    clone_graph, flatten, merge, merge_with, split, update, update_static, GraphDef, GraphError,
    Key, NodeHandle, Object, RefMap, State, StaticValue,
};
use rustyosg::registry::{Pytree, PytreeHandle, Registry};
use rustyosg::value::Value;
use rustyosg::variable::{kinds, Variable};

use ndarray::{ArrayD, IxDyn};
use ndarray_rand::rand_distr::Uniform;
use ndarray_rand::RandomExt;

/// Маленький «слой»: структура с двумя параметрами.
fn linear(din: usize, dout: usize) -> NodeHandle {
    let w = ArrayD::random(IxDyn(&[din, dout]), Uniform::new(-1.0, 1.0));
    NodeHandle::structure(
        "Linear",
        vec![
            ("w", Object::Variable(Variable::param(Value::Tensor(w)))),
            (
                "b",
                Object::Variable(Variable::param(Value::Tensor(ArrayD::zeros(IxDyn(&[
                    dout,
                ]))))),
            ),
        ],
    )
}

/// Повторный flatten со свежей картой — структурный отпечаток графа.
fn fingerprint(root: &Object) -> (GraphDef, State) {
    split(root).expect("flatten failed")
}

#[test]
fn test_flatten_shared_dict() {
    // g = [a, 3, a, Param(4)], где a — словарь с параметром
    let a = NodeHandle::dict(vec![
        ("a", Object::Static(StaticValue::Int(1))),
        (
            "b",
            Object::Variable(Variable::param(Value::ScalarF32(2.0))),
        ),
    ]);
    let g = NodeHandle::list(vec![
        Object::Node(a.clone()),
        Object::Static(StaticValue::Int(3)),
        Object::Node(a),
        Object::Variable(Variable::param(Value::ScalarF32(4.0))),
    ]);

    let mut ref_index = RefMap::new();
    let (graphdef, state) = flatten(&Object::Node(g), &mut ref_index).unwrap();

    // list, dict и две переменные — четыре объекта с идентичностью
    assert_eq!(ref_index.len(), 4);
    // разделяемый словарь даёт ровно одну запись на свой параметр
    assert_eq!(state.len(), 2);
    let paths: Vec<String> = state.iter().map(|(p, _)| p.to_string()).collect();
    assert_eq!(paths, vec!["0.b", "3"]);

    // второе вхождение a свёрнуто в ссылку
    match &graphdef {
        GraphDef::Node(def) => {
            assert!(def.attributes[0].1.is_node());
            assert!(def.attributes[2].1.is_node_ref());
        }
        _ => panic!("ожидался NodeDef"),
    }
}

#[test]
fn test_roundtrip_is_structurally_identical() {
    let model = NodeHandle::structure(
        "Mlp",
        vec![
            ("fc1", Object::Node(linear(4, 8))),
            ("fc2", Object::Node(linear(8, 2))),
            ("name", Object::Static(StaticValue::Str("mlp".into()))),
        ],
    );
    let root = Object::Node(model.clone());

    let (graphdef, state) = split(&root).unwrap();
    let restored = merge(&graphdef, state.clone()).unwrap();

    // структура и значения совпадают, идентичности — свежие
    let (graphdef2, state2) = fingerprint(&restored);
    assert_eq!(graphdef, graphdef2);
    assert_eq!(state, state2);
    assert!(!restored.is_same(&Object::Node(model)));
}

#[test]
fn test_shared_variable_single_state_entry() {
    // v = Param(1); g = [v, v]
    let v = Variable::param(Value::ScalarF32(1.0));
    let g = NodeHandle::list(vec![
        Object::Variable(v.clone()),
        Object::Variable(v),
    ]);

    let (graphdef, state) = split(&Object::Node(g)).unwrap();
    assert_eq!(state.len(), 1);

    let g2 = merge(&graphdef, state).unwrap();
    let node = g2.as_node().unwrap();
    let first = node.get(&Key::Index(0)).unwrap();
    let second = node.get(&Key::Index(1)).unwrap();
    assert!(first.is_same(&second));
    assert_eq!(
        first.as_variable().unwrap().value(),
        Value::ScalarF32(1.0)
    );
}

#[test]
fn test_tied_weights() {
    let bar = linear(2, 2);
    let baz = linear(2, 2);
    // связываем веса: baz.w — та же переменная, что bar.w
    let w = bar.get(&Key::from("w")).unwrap();
    baz.set(&Key::from("w"), w).unwrap();

    let model = NodeHandle::structure(
        "Foo",
        vec![("bar", Object::Node(bar)), ("baz", Object::Node(baz))],
    );

    let (graphdef, state) = split(&Object::Node(model)).unwrap();
    // 2 смещения + 1 общий вес
    assert_eq!(state.len(), 3);

    let restored = merge(&graphdef, state).unwrap();
    let node = restored.as_node().unwrap();
    let bar_w = node
        .get(&Key::from("bar"))
        .unwrap()
        .as_node()
        .unwrap()
        .get(&Key::from("w"))
        .unwrap();
    let baz_w = node
        .get(&Key::from("baz"))
        .unwrap()
        .as_node()
        .unwrap()
        .get(&Key::from("w"))
        .unwrap();
    assert!(bar_w.is_same(&baz_w));
}

#[test]
fn test_unflatten_empty_state_fails() {
    let g = NodeHandle::list(vec![Object::Variable(Variable::param(
        Value::ScalarF32(1.0),
    ))]);
    let (graphdef, _state) = split(&Object::Node(g)).unwrap();

    let err = merge(&graphdef, State::new()).unwrap_err();
    match err {
        GraphError::StructureMismatch(msg) => assert!(msg.contains("ожидался ключ")),
        other => panic!("неожиданная ошибка: {other:?}"),
    }
}

#[test]
fn test_self_reference_cycle() {
    // o.ref = o
    let o = NodeHandle::structure("Foo", vec![("ref", Object::Static(StaticValue::None))]);
    o.set(&Key::from("ref"), Object::Node(o.clone())).unwrap();

    let (graphdef, state) = split(&Object::Node(o)).unwrap();
    assert!(state.is_empty());
    match &graphdef {
        GraphDef::Node(def) => {
            assert_eq!(def.attributes[0].1, GraphDef::NodeRef { index: def.index });
        }
        _ => panic!("ожидался NodeDef"),
    }
    graphdef.validate().unwrap();

    let restored = merge(&graphdef, state).unwrap();
    let node = restored.as_node().unwrap();
    let inner = node.get(&Key::from("ref")).unwrap();
    assert!(inner.is_same(&restored));
}

#[test]
fn test_mutual_cycle() {
    // parent.child = child; child.parent = parent
    let parent = NodeHandle::structure("Parent", vec![("child", Object::Static(StaticValue::None))]);
    let child = NodeHandle::structure("Child", vec![("parent", Object::Node(parent.clone()))]);
    parent
        .set(&Key::from("child"), Object::Node(child))
        .unwrap();

    let (graphdef, state) = split(&Object::Node(parent)).unwrap();
    graphdef.validate().unwrap();
    let restored = merge(&graphdef, state).unwrap();

    let child2 = restored
        .as_node()
        .unwrap()
        .get(&Key::from("child"))
        .unwrap();
    let parent_again = child2
        .as_node()
        .unwrap()
        .get(&Key::from("parent"))
        .unwrap();
    assert!(parent_again.is_same(&restored));
}

#[test]
fn test_deep_nesting() {
    // цепочка вложенных списков глубиной 10^4 не должна переполнять стек
    let handle = std::thread::Builder::new()
        .stack_size(64 * 1024 * 1024)
        .spawn(|| {
            let mut node = Object::Variable(Variable::param(Value::ScalarF32(1.0)));
            for _ in 0..10_000 {
                node = Object::Node(NodeHandle::list(vec![node]));
            }

            let (graphdef, state) = split(&node).unwrap();
            assert_eq!(state.len(), 1);
            let restored = merge(&graphdef, state).unwrap();
            let (graphdef2, _) = split(&restored).unwrap();
            assert_eq!(graphdef, graphdef2);
        })
        .unwrap();
    handle.join().unwrap();
}

#[test]
fn test_unflatten_with_full_identity_cache() {
    let model = Object::Node(linear(2, 2));

    let mut ref_index = RefMap::new();
    let (graphdef, state) = flatten(&model, &mut ref_index).unwrap();

    // кэш, отображающий каждый индекс в уже существующий объект
    let mut cache = rustyosg::graph::IndexRef::new();
    for (obj, index) in ref_index.iter() {
        cache.insert(index, obj.clone());
    }

    let mut index_ref = rustyosg::graph::IndexRef::new();
    let restored = rustyosg::graph::unflatten(
        &graphdef,
        state,
        &rustyosg::registry::Registry::new(),
        &mut index_ref,
        Some(&cache),
    )
    .unwrap();

    // вернулся буквально переданный объект, а не новая аллокация
    assert!(restored.is_same(&model));
    let w = restored.as_node().unwrap().get(&Key::from("w")).unwrap();
    let w_orig = model.as_node().unwrap().get(&Key::from("w")).unwrap();
    assert!(w.is_same(&w_orig));
}

#[test]
fn test_flatten_deterministic_across_refmaps() {
    let model = Object::Node(linear(3, 3));

    let mut first_map = RefMap::new();
    let mut second_map = RefMap::new();
    let (def1, state1) = flatten(&model, &mut first_map).unwrap();
    let (def2, state2) = flatten(&model, &mut second_map).unwrap();

    assert_eq!(def1, def2);
    assert_eq!(state1, state2);
}

#[test]
fn test_update_dynamic() {
    let a = NodeHandle::dict(vec![
        ("a", Object::Static(StaticValue::Int(1))),
        (
            "b",
            Object::Variable(Variable::param(Value::ScalarF32(2.0))),
        ),
    ]);
    let g = NodeHandle::list(vec![
        Object::Node(a.clone()),
        Object::Static(StaticValue::Int(3)),
        Object::Node(a.clone()),
        Object::Variable(Variable::param(Value::ScalarF32(4.0))),
    ]);

    let (_graphdef, mut state) = split(&Object::Node(g.clone())).unwrap();
    let entry = state
        .get_mut(&rustyosg::graph::Path::root().key(0usize).key("b"))
        .unwrap();
    entry.as_variable_mut().unwrap().value = Value::ScalarF32(3.0);

    update(&Object::Node(g), state).unwrap();

    // изменение видно по обоим путям разделяемого словаря
    let b = a.get(&Key::from("b")).unwrap();
    assert_eq!(b.as_variable().unwrap().raw_value(), Value::ScalarF32(3.0));
}

#[test]
fn test_update_unknown_path_fails() {
    let g = NodeHandle::list(vec![Object::Variable(Variable::param(
        Value::ScalarF32(1.0),
    ))]);
    let mut state = State::new();
    state
        .insert(
            rustyosg::graph::Path::root().key(7usize),
            rustyosg::graph::StateEntry::Leaf(Value::ScalarF32(0.0)),
        )
        .unwrap();

    let err = update(&Object::Node(g), state).unwrap_err();
    assert!(matches!(err, GraphError::StructureMismatch(_)));
}

#[test]
fn test_update_static_propagates_to_aliases() {
    let a = NodeHandle::dict(vec![
        ("a", Object::Static(StaticValue::Int(1))),
        (
            "b",
            Object::Variable(Variable::param(Value::ScalarF32(2.0))),
        ),
    ]);
    let g = NodeHandle::list(vec![
        Object::Node(a.clone()),
        Object::Static(StaticValue::Int(3)),
        Object::Node(a.clone()),
    ]);

    let g2 = clone_graph(&Object::Node(g.clone())).unwrap();
    let a2 = g2.as_node().unwrap().get(&Key::Index(0)).unwrap();
    a2.as_node()
        .unwrap()
        .set(&Key::from("a"), Object::Static(StaticValue::Int(5)))
        .unwrap();

    update_static(&Object::Node(g.clone()), &g2).unwrap();

    assert_eq!(
        a.get(&Key::from("a")).unwrap().as_static(),
        Some(&StaticValue::Int(5))
    );
    // второй путь указывает на тот же словарь
    let via_second = g.get(&Key::Index(2)).unwrap();
    assert_eq!(
        via_second
            .as_node()
            .unwrap()
            .get(&Key::from("a"))
            .unwrap()
            .as_static(),
        Some(&StaticValue::Int(5))
    );
}

#[test]
fn test_update_static_type_change_fails() {
    let g = NodeHandle::list(vec![
        Object::Static(StaticValue::Int(3)),
        Object::Variable(Variable::param(Value::ScalarF32(4.0))),
    ]);
    let g2 = NodeHandle::list(vec![
        Object::Node(NodeHandle::dict(Vec::<(String, Object)>::new())),
        Object::Variable(Variable::param(Value::ScalarF32(4.0))),
    ]);

    let err = update_static(&Object::Node(g), &Object::Node(g2)).unwrap_err();
    assert!(matches!(err, GraphError::NodeTypeMismatch { .. }));
}

#[test]
fn test_update_static_add_new_and_reject_shared() {
    let a = NodeHandle::dict(vec![(
        "b",
        Object::Variable(Variable::param(Value::ScalarF32(2.0))),
    )]);
    let g = NodeHandle::list(vec![Object::Node(a.clone())]);

    // добавить свежий узел можно
    let fresh = NodeHandle::list(vec![
        Object::Static(StaticValue::Int(5)),
        Object::Static(StaticValue::Int(6)),
    ]);
    let g2 = NodeHandle::list(vec![Object::Node(a.clone()), Object::Node(fresh)]);
    update_static(&Object::Node(g.clone()), &Object::Node(g2)).unwrap();
    let added = g.get(&Key::Index(1)).unwrap();
    assert_eq!(
        added
            .as_node()
            .unwrap()
            .get(&Key::Index(0))
            .unwrap()
            .as_static(),
        Some(&StaticValue::Int(5))
    );

    // добавить уже разделяемый узел нельзя
    let g3 = NodeHandle::list(vec![
        Object::Node(a.clone()),
        g.get(&Key::Index(1)).unwrap(),
        Object::Node(a),
    ]);
    let err = update_static(&Object::Node(g), &Object::Node(g3)).unwrap_err();
    assert!(matches!(err, GraphError::SharedNodeInsert(_)));
}

#[test]
fn test_clone_graph_fresh_identities() {
    let v = Variable::param(Value::ScalarF32(1.0));
    let g = NodeHandle::list(vec![
        Object::Variable(v.clone()),
        Object::Variable(v.clone()),
    ]);

    let cloned = clone_graph(&Object::Node(g.clone())).unwrap();
    let node = cloned.as_node().unwrap();
    let first = node.get(&Key::Index(0)).unwrap();
    let second = node.get(&Key::Index(1)).unwrap();

    // разделение сохранено, но переменная — новая
    assert!(first.is_same(&second));
    assert!(!first
        .as_variable()
        .unwrap()
        .ptr_eq(&v));
}

// --------------------------- Pytree ---------------------------

/// Внешний контейнер: динамическое поле `a` и статическая строка `label`.
struct Tagged {
    a: Object,
    label: String,
}

impl Pytree for Tagged {
    fn type_tag(&self) -> &str {
        "Tagged"
    }

    fn decompose(&self) -> (Vec<(Key, Object)>, StaticValue) {
        (
            vec![(Key::from("a"), self.a.clone())],
            StaticValue::Str(self.label.clone()),
        )
    }
}

fn rebuild_tagged(
    children: Vec<(Key, Object)>,
    meta: &StaticValue,
) -> Result<Object, GraphError> {
    let label = match meta {
        StaticValue::Str(s) => s.clone(),
        _ => return Err(GraphError::StructureMismatch("неверная статика Tagged".into())),
    };
    let a = children
        .into_iter()
        .find(|(k, _)| *k == Key::from("a"))
        .map(|(_, v)| v)
        .ok_or_else(|| GraphError::StructureMismatch("у Tagged нет поля 'a'".into()))?;
    Ok(Object::Pytree(PytreeHandle::new(Tagged { a, label })))
}

#[test]
fn test_pytree_static_and_dynamic_fields() {
    let tree = Tagged {
        a: Object::Variable(Variable::param(Value::ScalarF32(1.0))),
        label: "positions".into(),
    };
    let model = NodeHandle::structure(
        "Foo",
        vec![("tree", Object::Pytree(PytreeHandle::new(tree)))],
    );

    let (graphdef, state) = split(&Object::Node(model)).unwrap();
    // динамика — в state, статика — в описании
    assert_eq!(state.len(), 1);
    assert_eq!(state.flat_state()[0].0.to_string(), "tree.a");

    let mut registry = Registry::new();
    registry.register("Tagged", rebuild_tagged);
    let restored = merge_with(&registry, &graphdef, state).unwrap();

    let tree2 = restored
        .as_node()
        .unwrap()
        .get(&Key::from("tree"))
        .unwrap();
    match tree2 {
        Object::Pytree(handle) => {
            let (children, meta) = handle.decompose();
            assert_eq!(meta, StaticValue::Str("positions".into()));
            assert_eq!(
                children[0].1.as_variable().unwrap().value(),
                Value::ScalarF32(1.0)
            );
        }
        other => panic!("ожидался pytree, получен {other:?}"),
    }
}

#[test]
fn test_pytree_without_identity() {
    // одно и то же pytree в двух слотах раскладывается дважды:
    // контейнер без идентичности, а переменная внутри — с идентичностью
    let shared_var = Variable::param(Value::ScalarF32(1.0));
    let tree = PytreeHandle::new(Tagged {
        a: Object::Variable(shared_var),
        label: "x".into(),
    });
    let g = NodeHandle::list(vec![
        Object::Pytree(tree.clone()),
        Object::Pytree(tree),
    ]);

    let (graphdef, state) = split(&Object::Node(g)).unwrap();
    // переменная дедуплицирована, контейнер — нет
    assert_eq!(state.len(), 1);

    let mut registry = Registry::new();
    registry.register("Tagged", rebuild_tagged);
    let restored = merge_with(&registry, &graphdef, state).unwrap();
    let node = restored.as_node().unwrap();
    let a0 = match node.get(&Key::Index(0)).unwrap() {
        Object::Pytree(h) => h.decompose().0.remove(0).1,
        other => panic!("ожидался pytree, получен {other:?}"),
    };
    let a1 = match node.get(&Key::Index(1)).unwrap() {
        Object::Pytree(h) => h.decompose().0.remove(0).1,
        other => panic!("ожидался pytree, получен {other:?}"),
    };
    assert!(a0.is_same(&a1));
}

#[test]
fn test_pytree_unknown_type_fails() {
    let tree = Tagged {
        a: Object::Leaf(Value::ScalarF32(1.0)),
        label: "x".into(),
    };
    let (graphdef, state) = split(&Object::Pytree(PytreeHandle::new(tree))).unwrap();

    let err = merge(&graphdef, state).unwrap_err();
    assert!(matches!(err, GraphError::UnknownPytreeType(_)));
}

#[test]
fn test_variable_kind_filter_on_state() {
    let model = NodeHandle::structure(
        "Block",
        vec![
            (
                "w",
                Object::Variable(Variable::param(Value::ScalarF32(1.0))),
            ),
            (
                "mean",
                Object::Variable(Variable::batch_stat(Value::ScalarF32(0.0))),
            ),
        ],
    );
    let (_graphdef, state) = split(&Object::Node(model)).unwrap();

    let params = state.filter_kind(kinds::PARAM);
    assert_eq!(params.len(), 1);
    assert_eq!(params.flat_state()[0].0.to_string(), "w");

    let (stats, rest) = state.split_by(|_, entry| {
        entry
            .as_variable()
            .map(|vs| vs.kind == kinds::BATCH_STAT)
            .unwrap_or(false)
    });
    assert_eq!(stats.len(), 1);
    assert_eq!(rest.len(), 1);
}
