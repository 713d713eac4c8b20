//! Unflatten: восстановление живого графа из пары (GraphDef, State).
//!
//! Восстановление идёт в глубину. Узел регистрируется в `index_ref` под
//! своим индексом ДО рекурсии в детей — поэтому NodeRef на самого себя
//! (цикл) разрешается без бесконечной рекурсии. Если передан кэш
//! идентичности (`index_ref_cache`), узлы и переменные с совпавшим индексом
//! переиспользуются по месту: граница чистой функции возвращает вызывающему
//! буквально те же объекты, что он в неё передал.

use crate::graph::graphdef::GraphDef;
use crate::graph::object::{NodeHandle, Object};
use crate::graph::refmap::{IndexRef, RefMap};
use crate::graph::state::{Key, Path, State, StateEntry};
use crate::graph::{GraphError, GraphResult};
use crate::registry::Registry;
use log::debug;

/// Восстанавливает граф по описанию и состоянию.
///
/// `index_ref` наполняется восстановленными объектами по их индексам;
/// при передаче общей карты между вызовами (merge-контекст) ссылки NodeRef
/// из одного вызова разрешаются в объекты, построенные другим.
pub fn unflatten(
    graphdef: &GraphDef,
    state: State,
    registry: &Registry,
    index_ref: &mut IndexRef,
    index_ref_cache: Option<&IndexRef>,
) -> GraphResult<Object> {
    let mut state = state;
    let mut path = Path::root();
    let root = unflatten_object(
        graphdef,
        &mut path,
        &mut state,
        registry,
        index_ref,
        index_ref_cache,
    )?;
    if !state.is_empty() {
        debug!(
            "unflatten: {} неиспользованных записей state, первая '{}'",
            state.len(),
            state.flat_state()[0].0
        );
    }
    Ok(root)
}

/// Одноразовое восстановление без pytree-типов.
pub fn merge(graphdef: &GraphDef, state: State) -> GraphResult<Object> {
    merge_with(&Registry::new(), graphdef, state)
}

/// Одноразовое восстановление с реестром pytree-типов.
pub fn merge_with(registry: &Registry, graphdef: &GraphDef, state: State) -> GraphResult<Object> {
    let mut index_ref = IndexRef::new();
    unflatten(graphdef, state, registry, &mut index_ref, None)
}

/// Структурно-эквивалентная копия графа: все объекты с идентичностью —
/// свежие, разделяемые ссылки и циклы сохранены.
pub fn clone_graph(root: &Object) -> GraphResult<Object> {
    let mut ref_index = RefMap::new();
    let (def, state) = super::flatten::flatten(root, &mut ref_index)?;
    merge(&def, state)
}

fn take_entry(state: &mut State, path: &Path) -> GraphResult<StateEntry> {
    state.take(path).ok_or_else(|| {
        GraphError::StructureMismatch(format!("ожидался ключ '{}', его нет в State", path))
    })
}

fn unflatten_object(
    graphdef: &GraphDef,
    path: &mut Path,
    state: &mut State,
    registry: &Registry,
    index_ref: &mut IndexRef,
    index_ref_cache: Option<&IndexRef>,
) -> GraphResult<Object> {
    match graphdef {
        GraphDef::Node(def) => {
            let node = match index_ref_cache.and_then(|cache| cache.get(&def.index)) {
                Some(Object::Node(existing)) => {
                    if existing.node_type() != def.node_type {
                        return Err(GraphError::NodeTypeMismatch {
                            expected: def.node_type.to_string(),
                            actual: existing.node_type().to_string(),
                        });
                    }
                    existing.clone()
                }
                Some(_) => return Err(GraphError::StructureCorruption(def.index)),
                None => NodeHandle::empty(def.node_type.clone()),
            };
            // регистрация до рекурсии: ссылки детей на этот узел уже разрешимы
            index_ref.insert(def.index, Object::Node(node.clone()));

            let mut entries: Vec<(Key, Object)> = Vec::with_capacity(def.attributes.len());
            for (key, child_def) in &def.attributes {
                path.push(key.clone());
                let child = unflatten_object(
                    child_def,
                    path,
                    state,
                    registry,
                    index_ref,
                    index_ref_cache,
                )?;
                path.pop();
                entries.push((key.clone(), child));
            }
            node.replace_entries(entries)?;
            Ok(Object::Node(node))
        }
        GraphDef::NodeRef { index } => match index_ref.get(index) {
            Some(obj @ Object::Node(_)) => Ok(obj.clone()),
            _ => Err(GraphError::StructureCorruption(*index)),
        },
        GraphDef::Variable { index } => {
            let entry = take_entry(state, path)?;
            let var_state = match entry {
                StateEntry::Variable(vs) => vs,
                StateEntry::Leaf(_) => {
                    return Err(GraphError::StructureMismatch(format!(
                        "по пути '{}' ожидалась переменная, а не лист",
                        path
                    )))
                }
            };
            let variable = match index_ref_cache.and_then(|cache| cache.get(index)) {
                Some(Object::Variable(existing)) => {
                    // запись по месту: идентичность и эпоха получателя сохраняются
                    existing.update_from_state(&var_state);
                    existing.clone()
                }
                Some(_) => return Err(GraphError::StructureCorruption(*index)),
                None => var_state.to_variable(),
            };
            index_ref.insert(*index, Object::Variable(variable.clone()));
            Ok(Object::Variable(variable))
        }
        GraphDef::VariableRef { index } => match index_ref.get(index) {
            Some(obj @ Object::Variable(_)) => Ok(obj.clone()),
            _ => Err(GraphError::StructureCorruption(*index)),
        },
        GraphDef::Pytree(def) => {
            let mut children: Vec<(Key, Object)> = Vec::with_capacity(def.attributes.len());
            for (key, child_def) in &def.attributes {
                path.push(key.clone());
                let child = unflatten_object(
                    child_def,
                    path,
                    state,
                    registry,
                    index_ref,
                    index_ref_cache,
                )?;
                path.pop();
                children.push((key.clone(), child));
            }
            let recompose = registry.resolve(&def.type_tag)?;
            recompose(children, &def.meta)
        }
        GraphDef::Leaf => {
            let entry = take_entry(state, path)?;
            match entry {
                StateEntry::Leaf(value) => Ok(Object::Leaf(value)),
                StateEntry::Variable(_) => Err(GraphError::StructureMismatch(format!(
                    "по пути '{}' ожидался лист, а не переменная",
                    path
                ))),
            }
        }
        GraphDef::Static(value) => Ok(Object::Static(value.clone())),
    }
}

/// Записывает (возможно частичный) State обратно в живой граф по путям.
///
/// Переменные обновляются по месту; разделяемая переменная обновляется
/// один раз — по первому пути — и изменение видно по всем остальным.
/// Путь State, которому не нашлось слота в графе, — несовпадение структуры.
pub fn update(root: &Object, state: State) -> GraphResult<()> {
    let mut state = state;
    let mut seen = RefMap::new();
    let mut path = Path::root();
    update_object(root, &mut path, &mut seen, &mut state)?;
    if let Some((path, _)) = state.flat_state().first() {
        return Err(GraphError::StructureMismatch(format!(
            "в графе нет слота по пути '{}'",
            path
        )));
    }
    Ok(())
}

fn update_object(
    obj: &Object,
    path: &mut Path,
    seen: &mut RefMap,
    state: &mut State,
) -> GraphResult<()> {
    match obj {
        Object::Variable(variable) => {
            if seen.contains(obj) {
                return Ok(());
            }
            seen.insert(obj.clone());
            if let Some(entry) = state.take(path) {
                match entry {
                    StateEntry::Variable(vs) => variable.update_from_state(&vs),
                    StateEntry::Leaf(_) => {
                        return Err(GraphError::StructureMismatch(format!(
                            "по пути '{}' ожидалась переменная, а не лист",
                            path
                        )))
                    }
                }
            }
            Ok(())
        }
        Object::Node(node) => {
            if seen.contains(obj) {
                return Ok(());
            }
            seen.insert(obj.clone());
            for (key, child) in node.entries() {
                path.push(key.clone());
                match &child {
                    // лист лежит в родителе по значению: заменяем слот целиком
                    Object::Leaf(_) => {
                        if let Some(entry) = state.take(path) {
                            match entry {
                                StateEntry::Leaf(value) => {
                                    node.set(&key, Object::Leaf(value))?;
                                }
                                StateEntry::Variable(_) => {
                                    return Err(GraphError::StructureMismatch(format!(
                                        "по пути '{}' ожидался лист, а не переменная",
                                        path
                                    )))
                                }
                            }
                        }
                    }
                    other => update_object(other, path, seen, state)?,
                }
                path.pop();
            }
            Ok(())
        }
        Object::Pytree(tree) => {
            for (key, child) in tree.decompose().0 {
                path.push(key.clone());
                match &child {
                    Object::Leaf(_) => {
                        // pytree собирается заново при unflatten; по месту его
                        // листья не обновляются
                        if state.take(path).is_some() {
                            return Err(GraphError::StructureMismatch(format!(
                                "слот '{}' внутри pytree не обновляется по месту",
                                path
                            )));
                        }
                    }
                    other => update_object(other, path, seen, state)?,
                }
                path.pop();
            }
            Ok(())
        }
        Object::Leaf(_) | Object::Static(_) => Ok(()),
    }
}

/// Переносит статическую структуру из `source` в `target`: обновлённые
/// статические значения и добавленные поддеревья. Динамика (переменные,
/// листья) не затрагивается.
pub fn update_static(target: &Object, source: &Object) -> GraphResult<()> {
    match (target, source) {
        (Object::Node(t), Object::Node(s)) => {
            let mut seen = RefMap::new();
            let mut path = Path::root();
            update_static_node(t, s, &mut seen, &mut path)
        }
        _ => Err(GraphError::NodeTypeMismatch {
            expected: target.kind_name(),
            actual: source.kind_name(),
        }),
    }
}

fn update_static_node(
    target: &NodeHandle,
    source: &NodeHandle,
    seen: &mut RefMap,
    path: &mut Path,
) -> GraphResult<()> {
    if target.node_type() != source.node_type() {
        return Err(GraphError::NodeTypeMismatch {
            expected: target.node_type().to_string(),
            actual: source.node_type().to_string(),
        });
    }
    let source_obj = Object::Node(source.clone());
    if seen.contains(&source_obj) {
        return Ok(());
    }
    seen.insert(source_obj);

    for (key, source_child) in source.entries() {
        path.push(key.clone());
        match target.get(&key) {
            None => {
                // новое поддерево; разделяемые узлы добавлять нельзя
                ensure_unseen(&source_child, seen, path)?;
                register_subtree(&source_child, seen);
                target.set(&key, source_child.clone())?;
            }
            Some(target_child) => match (&target_child, &source_child) {
                (Object::Static(_), Object::Static(value)) => {
                    target.set(&key, Object::Static(value.clone()))?;
                }
                (Object::Node(t), Object::Node(s)) => {
                    update_static_node(t, s, seen, path)?;
                }
                (Object::Variable(_), Object::Variable(_))
                | (Object::Leaf(_), Object::Leaf(_))
                | (Object::Pytree(_), Object::Pytree(_)) => {}
                _ => {
                    return Err(GraphError::NodeTypeMismatch {
                        expected: target_child.kind_name(),
                        actual: source_child.kind_name(),
                    })
                }
            },
        }
        path.pop();
    }
    Ok(())
}

/// Проверяет, что в поддереве нет объектов, уже встреченных в этом проходе.
fn ensure_unseen(obj: &Object, seen: &RefMap, path: &Path) -> GraphResult<()> {
    let mut local = RefMap::new();
    ensure_unseen_rec(obj, seen, &mut local, path)
}

fn ensure_unseen_rec(
    obj: &Object,
    seen: &RefMap,
    local: &mut RefMap,
    path: &Path,
) -> GraphResult<()> {
    if obj.identity_id().is_some() {
        if seen.contains(obj) {
            return Err(GraphError::SharedNodeInsert(path.to_string()));
        }
        if local.contains(obj) {
            return Ok(());
        }
        local.insert(obj.clone());
    }
    let children = match obj {
        Object::Node(node) => node.entries(),
        Object::Pytree(tree) => tree.decompose().0,
        _ => return Ok(()),
    };
    for (_, child) in children {
        ensure_unseen_rec(&child, seen, local, path)?;
    }
    Ok(())
}

/// Регистрирует все объекты поддерева как встреченные.
fn register_subtree(obj: &Object, seen: &mut RefMap) {
    if obj.identity_id().is_some() {
        if seen.contains(obj) {
            return;
        }
        seen.insert(obj.clone());
    }
    let children = match obj {
        Object::Node(node) => node.entries(),
        Object::Pytree(tree) => tree.decompose().0,
        _ => return,
    };
    for (_, child) in children {
        register_subtree(&child, seen);
    }
}
