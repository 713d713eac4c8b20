//! Демонстрация цикла split/merge: модель с разделяемым подмодулем
//! проходит через границу «чистой функции» и возвращается — буквально
//! теми же объектами, с записанными внутри границы мутациями.

use rustyosg::graph::{Key, NodeHandle, Object, UpdateContext};
use rustyosg::registry::Registry;
use rustyosg::value::Value;
use rustyosg::variable::Variable;

use ndarray::{ArrayD, IxDyn};

fn linear(name: &str, din: usize, dout: usize) -> NodeHandle {
    NodeHandle::structure(
        "Linear",
        vec![
            (
                "w",
                Object::Variable(Variable::param(Value::Tensor(ArrayD::from_elem(
                    IxDyn(&[din, dout]),
                    0.5,
                )))),
            ),
            (
                "b",
                Object::Variable(Variable::param(Value::Tensor(ArrayD::zeros(IxDyn(&[
                    dout,
                ]))))),
            ),
            (
                "name",
                Object::Static(rustyosg::graph::StaticValue::Str(name.to_string())),
            ),
        ],
    )
}

fn main() {
    env_logger::init();

    // энкодер и декодер делят один слой проекции
    let shared = linear("proj", 4, 4);
    let model = Object::Node(NodeHandle::structure(
        "Autoencoder",
        vec![
            ("encoder", Object::Node(shared.clone())),
            ("decoder", Object::Node(shared)),
        ],
    ));

    let registry = Registry::new();
    let mut ctx = UpdateContext::new();

    // исходящий проход
    let (graphdef, state) = ctx
        .split_scope(|sc| sc.split(&model))
        .expect("split failed");
    println!("state: {} записей (разделяемый слой посчитан один раз)", state.len());

    // граница: «шаг обучения» масштабирует все параметры
    let (graphdef2, state2) = ctx.pure(|ctx| {
        let m = ctx
            .merge_scope(&registry, |mc| mc.merge(&graphdef, state))
            .expect("merge failed");

        for (path, obj) in rustyosg::graph::iter_graph(&m) {
            if let Object::Variable(var) = obj {
                if let Value::Tensor(arr) = var.raw_value() {
                    var.set_value(Value::Tensor(arr.mapv(|x| x * 0.9)))
                        .expect("set_value failed");
                    println!("  обновлён {}", path);
                }
            }
        }

        ctx.split_scope(|sc| sc.split(&m)).expect("split failed")
    });

    // входящий проход: мутации записываются в исходную модель
    let model_out = ctx
        .merge_scope(&registry, |mc| mc.merge(&graphdef2, state2))
        .expect("merge failed");

    assert!(model_out.is_same(&model));
    let encoder = model.as_node().unwrap().get(&Key::from("encoder")).unwrap();
    let w = encoder.as_node().unwrap().get(&Key::from("w")).unwrap();
    if let Value::Tensor(arr) = w.as_variable().unwrap().raw_value() {
        println!("w[0,0] после границы: {}", arr[[0, 0]]);
    }
    println!("граница вернула исходную модель: мутации видны снаружи");
}
