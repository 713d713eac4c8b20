//! Flatten: превращение живого графа в пару (GraphDef, State).
//!
//! Обход в глубину в каноническом порядке детей. Первое вхождение объекта
//! с идентичностью получает следующий плотный индекс; повторные вхождения
//! сворачиваются в ссылки NodeRef/VariableRef — так представляются
//! разделяемые ссылки и разрываются циклы. В State попадает ровно одна
//! запись на переменную, сколько бы путей на неё ни указывало.

use crate::graph::graphdef::{GraphDef, NodeDef, PytreeDef};
use crate::graph::object::Object;
use crate::graph::refmap::RefMap;
use crate::graph::state::{Path, State, StateEntry};
use crate::graph::GraphResult;
use log::debug;

/// Обходит граф от корня и строит его плоское представление.
///
/// `ref_index` накапливает индексы идентичности; повторный вызов с той же
/// картой (внутри split-контекста) видит уже пронумерованные объекты и
/// сворачивает их в ссылки. Нумерация локальна для карты, а не глобальна.
pub fn flatten(root: &Object, ref_index: &mut RefMap) -> GraphResult<(GraphDef, State)> {
    let mut state = State::new();
    let mut path = Path::root();
    let def = flatten_object(root, &mut path, ref_index, &mut state)?;
    debug!(
        "flatten: объектов в индексе {}, записей в state {}",
        ref_index.len(),
        state.len()
    );
    Ok((def, state))
}

/// Одноразовый flatten со свежей картой идентичности.
pub fn split(root: &Object) -> GraphResult<(GraphDef, State)> {
    let mut ref_index = RefMap::new();
    flatten(root, &mut ref_index)
}

fn flatten_object(
    obj: &Object,
    path: &mut Path,
    ref_index: &mut RefMap,
    state: &mut State,
) -> GraphResult<GraphDef> {
    match obj {
        Object::Variable(variable) => {
            if let Some(index) = ref_index.get(obj) {
                // разделяемая переменная: в State уже есть её запись
                return Ok(GraphDef::VariableRef { index });
            }
            let index = ref_index.insert(obj.clone());
            state.insert(path.clone(), StateEntry::Variable(variable.to_state()))?;
            Ok(GraphDef::Variable { index })
        }
        Object::Node(node) => {
            if let Some(index) = ref_index.get(obj) {
                return Ok(GraphDef::NodeRef { index });
            }
            let index = ref_index.insert(obj.clone());
            let children = node.entries();
            let mut attributes = Vec::with_capacity(children.len());
            for (key, child) in children {
                path.push(key.clone());
                let child_def = flatten_object(&child, path, ref_index, state)?;
                path.pop();
                attributes.push((key, child_def));
            }
            Ok(GraphDef::Node(NodeDef {
                node_type: node.node_type(),
                index,
                attributes,
                index_mapping: None,
            }))
        }
        Object::Pytree(tree) => {
            // без идентичности: каждое вхождение раскладывается заново,
            // но переменные внутри по-прежнему дедуплицируются
            let (children, meta) = tree.decompose();
            let mut attributes = Vec::with_capacity(children.len());
            for (key, child) in children {
                path.push(key.clone());
                let child_def = flatten_object(&child, path, ref_index, state)?;
                path.pop();
                attributes.push((key, child_def));
            }
            Ok(GraphDef::Pytree(PytreeDef {
                type_tag: tree.type_tag(),
                attributes,
                meta,
            }))
        }
        Object::Leaf(value) => {
            state.insert(path.clone(), StateEntry::Leaf(value.clone()))?;
            Ok(GraphDef::Leaf)
        }
        Object::Static(value) => Ok(GraphDef::Static(value.clone())),
    }
}

/// Обходит граф и возвращает пары (путь, объект) в каноническом порядке.
/// Каждый объект с идентичностью посещается один раз — по первому пути.
pub fn iter_graph(root: &Object) -> Vec<(Path, Object)> {
    let mut seen = RefMap::new();
    let mut out = Vec::new();
    let mut path = Path::root();
    visit(root, &mut path, &mut seen, &mut out);
    out
}

fn visit(obj: &Object, path: &mut Path, seen: &mut RefMap, out: &mut Vec<(Path, Object)>) {
    if seen.contains(obj) {
        return;
    }
    if obj.identity_id().is_some() {
        seen.insert(obj.clone());
    }
    out.push((path.clone(), obj.clone()));
    let children = match obj {
        Object::Node(node) => node.entries(),
        Object::Pytree(tree) => tree.decompose().0,
        _ => return,
    };
    for (key, child) in children {
        path.push(key);
        visit(&child, path, seen, out);
        path.pop();
    }
}
