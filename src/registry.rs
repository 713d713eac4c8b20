//! Реестр внешних контейнерных типов (pytree).
//!
//! Pytree — контейнер без идентичности: при flatten он раскладывается на
//! динамические поля (уходят в обход) и статические метаданные (встраиваются
//! в GraphDef), при unflatten собирается заново зарегистрированной
//! recompose-функцией. Таблица заполняется один раз при регистрации,
//! а не на каждом обходе.

use crate::graph::object::{Object, StaticValue};
use crate::graph::state::Key;
use crate::graph::{GraphError, GraphResult};
use std::collections::HashMap;
use std::fmt;
use std::rc::Rc;

/// Интерфейс внешнего контейнера: как разложить его на части.
pub trait Pytree {
    /// Тег типа; по нему при unflatten находится recompose-функция.
    fn type_tag(&self) -> &str;

    /// Раскладывает контейнер на (динамические поля, статические метаданные).
    fn decompose(&self) -> (Vec<(Key, Object)>, StaticValue);
}

/// Дескриптор pytree-контейнера. Без идентичности: при каждом unflatten
/// контейнер собирается заново.
#[derive(Clone)]
pub struct PytreeHandle(Rc<dyn Pytree>);

impl PytreeHandle {
    pub fn new(tree: impl Pytree + 'static) -> Self {
        Self(Rc::new(tree))
    }

    pub fn type_tag(&self) -> String {
        self.0.type_tag().to_string()
    }

    pub fn decompose(&self) -> (Vec<(Key, Object)>, StaticValue) {
        self.0.decompose()
    }
}

impl fmt::Debug for PytreeHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PytreeHandle({})", self.0.type_tag())
    }
}

/// Собирает контейнер из восстановленных детей и статических метаданных.
pub type RecomposeFn = fn(Vec<(Key, Object)>, &StaticValue) -> GraphResult<Object>;

/// Таблица tag -> recompose.
#[derive(Default)]
pub struct Registry {
    recompose: HashMap<String, RecomposeFn>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, type_tag: impl Into<String>, recompose: RecomposeFn) {
        self.recompose.insert(type_tag.into(), recompose);
    }

    pub fn contains(&self, type_tag: &str) -> bool {
        self.recompose.contains_key(type_tag)
    }

    pub fn resolve(&self, type_tag: &str) -> GraphResult<RecomposeFn> {
        self.recompose
            .get(type_tag)
            .copied()
            .ok_or_else(|| GraphError::UnknownPytreeType(type_tag.to_string()))
    }
}

impl fmt::Debug for Registry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut tags: Vec<&String> = self.recompose.keys().collect();
        tags.sort();
        f.debug_struct("Registry").field("types", &tags).finish()
    }
}
