//! RefMap: индекс идентичности для одного прохода flatten.
//!
//! Отображает идентичность объекта (адрес разделяемого тела) в плотный
//! целочисленный индекс. Карта append-only и живёт не дольше одного прохода
//! (или одной области split-контекста): долговременной записью идентичности
//! служит сам GraphDef через индексы NodeRef/VariableRef.
//!
//! Карта держит сильные клоны дескрипторов, поэтому адрес не может быть
//! переиспользован аллокатором, пока карта жива.

use crate::graph::graphdef::Index;
use crate::graph::object::Object;
use std::collections::HashMap;

#[derive(Debug, Default)]
pub struct RefMap {
    by_id: HashMap<usize, Index>,
    objects: Vec<Object>,
}

impl RefMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    pub fn contains(&self, obj: &Object) -> bool {
        self.get(obj).is_some()
    }

    /// Индекс объекта, если его идентичность уже встречалась.
    /// Для объектов без идентичности (листья, статика, pytree) всегда None.
    pub fn get(&self, obj: &Object) -> Option<Index> {
        obj.identity_id()
            .and_then(|id| self.by_id.get(&id).copied())
    }

    /// Регистрирует объект под следующим плотным индексом.
    pub(crate) fn insert(&mut self, obj: Object) -> Index {
        let index = self.objects.len();
        if let Some(id) = obj.identity_id() {
            self.by_id.insert(id, index);
        }
        self.objects.push(obj);
        index
    }

    /// Пары (объект, индекс) в порядке регистрации.
    pub fn iter(&self) -> impl Iterator<Item = (&Object, Index)> {
        self.objects.iter().enumerate().map(|(i, obj)| (obj, i))
    }
}

/// Обратное отображение: индекс -> живой объект. Используется при unflatten
/// (реестр уже восстановленных узлов) и как кэш идентичности между вызовами.
pub type IndexRef = HashMap<Index, Object>;

/// Композиция «внешний индекс -> объект» с «объект -> внутренний индекс»:
/// даёт таблицу «внешний индекс -> внутренний индекс» для объектов,
/// переживших границу.
pub fn compose_mapping(index_ref: &IndexRef, ref_index: &RefMap) -> HashMap<Index, Index> {
    let mut mapping = HashMap::new();
    for (outer_index, obj) in index_ref {
        if let Some(inner_index) = ref_index.get(obj) {
            mapping.insert(*outer_index, inner_index);
        }
    }
    mapping
}

/// Обратная композиция: по «объект -> внешний индекс» и таблице
/// «внешний -> внутренний» строит «внутренний индекс -> объект» —
/// кэш идентичности для восстановления в исходные объекты.
pub fn compose_mapping_reversed(
    ref_index: &RefMap,
    index_mapping: &[(Index, Index)],
) -> IndexRef {
    let mut by_outer: HashMap<Index, &Object> = HashMap::new();
    for (obj, index) in ref_index.iter() {
        by_outer.insert(index, obj);
    }
    let mut cache = IndexRef::new();
    for (outer, inner) in index_mapping {
        if let Some(obj) = by_outer.get(outer) {
            cache.insert(*inner, (*obj).clone());
        }
    }
    cache
}
