//! Живая модель графа объектов.
//!
//! Узлы с идентичностью (`NodeHandle`) — это контейнеры модели: словари,
//! списки и структуры с объявленным порядком полей. Дескриптор дёшев в
//! клонировании и разделяет одно изменяемое тело; идентичность — это
//! идентичность тела (`ptr_eq`), как у переменных.

use crate::graph::state::Key;
use crate::graph::{GraphError, GraphResult};
use crate::registry::PytreeHandle;
use crate::value::Value;
use crate::variable::Variable;
use serde::{Deserialize, Serialize};
use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

/// Статическое значение: хранится прямо в GraphDef, поэтому обязано быть
/// хэшируемым. Плавающие числа — это листья (State), не статика.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StaticValue {
    None,
    Bool(bool),
    Int(i64),
    Str(String),
}

impl fmt::Display for StaticValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StaticValue::None => write!(f, "None"),
            StaticValue::Bool(b) => write!(f, "{}", b),
            StaticValue::Int(i) => write!(f, "{}", i),
            StaticValue::Str(s) => write!(f, "{}", s),
        }
    }
}

/// Тип узла-контейнера; для структур — имя объявленного типа.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NodeType {
    Dict,
    List,
    Struct(String),
}

impl fmt::Display for NodeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NodeType::Dict => write!(f, "dict"),
            NodeType::List => write!(f, "list"),
            NodeType::Struct(name) => write!(f, "{}", name),
        }
    }
}

/// Тело узла. Канонический порядок детей: словарь — по ключу, список —
/// по индексу, структура — в объявленном порядке полей.
#[derive(Debug)]
pub enum GraphNode {
    /// Записи держатся отсортированными по ключу.
    Dict(Vec<(String, Object)>),
    List(Vec<Object>),
    Struct {
        type_name: String,
        fields: Vec<(String, Object)>,
    },
}

/// Дескриптор узла с идентичностью.
#[derive(Clone)]
pub struct NodeHandle {
    body: Rc<RefCell<GraphNode>>,
}

impl NodeHandle {
    /// Словарь; записи сортируются по ключу при создании.
    pub fn dict<K: Into<String>>(entries: Vec<(K, Object)>) -> Self {
        let mut entries: Vec<(String, Object)> = entries
            .into_iter()
            .map(|(k, v)| (k.into(), v))
            .collect();
        entries.sort_by(|(a, _), (b, _)| a.cmp(b));
        Self {
            body: Rc::new(RefCell::new(GraphNode::Dict(entries))),
        }
    }

    pub fn list(items: Vec<Object>) -> Self {
        Self {
            body: Rc::new(RefCell::new(GraphNode::List(items))),
        }
    }

    /// Структура с объявленным порядком полей.
    pub fn structure<K: Into<String>>(
        type_name: impl Into<String>,
        fields: Vec<(K, Object)>,
    ) -> Self {
        Self {
            body: Rc::new(RefCell::new(GraphNode::Struct {
                type_name: type_name.into(),
                fields: fields.into_iter().map(|(k, v)| (k.into(), v)).collect(),
            })),
        }
    }

    /// Пустой узел заданного типа; заполняется при восстановлении.
    pub(crate) fn empty(node_type: NodeType) -> Self {
        match node_type {
            NodeType::Dict => Self::dict(Vec::<(String, Object)>::new()),
            NodeType::List => Self::list(Vec::new()),
            NodeType::Struct(type_name) => {
                Self::structure(type_name, Vec::<(String, Object)>::new())
            }
        }
    }

    pub fn node_type(&self) -> NodeType {
        match &*self.body.borrow() {
            GraphNode::Dict(_) => NodeType::Dict,
            GraphNode::List(_) => NodeType::List,
            GraphNode::Struct { type_name, .. } => NodeType::Struct(type_name.clone()),
        }
    }

    /// Снимок детей в каноническом порядке. Возвращает копии дескрипторов,
    /// поэтому рекурсия по снимку не держит заимствование тела.
    pub fn entries(&self) -> Vec<(Key, Object)> {
        match &*self.body.borrow() {
            GraphNode::Dict(entries) => entries
                .iter()
                .map(|(k, v)| (Key::Name(k.clone()), v.clone()))
                .collect(),
            GraphNode::List(items) => items
                .iter()
                .enumerate()
                .map(|(i, v)| (Key::Index(i), v.clone()))
                .collect(),
            GraphNode::Struct { fields, .. } => fields
                .iter()
                .map(|(k, v)| (Key::Name(k.clone()), v.clone()))
                .collect(),
        }
    }

    pub fn len(&self) -> usize {
        match &*self.body.borrow() {
            GraphNode::Dict(entries) => entries.len(),
            GraphNode::List(items) => items.len(),
            GraphNode::Struct { fields, .. } => fields.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn get(&self, key: &Key) -> Option<Object> {
        match (&*self.body.borrow(), key) {
            (GraphNode::Dict(entries), Key::Name(name)) => entries
                .iter()
                .find(|(k, _)| k == name)
                .map(|(_, v)| v.clone()),
            (GraphNode::List(items), Key::Index(i)) => items.get(*i).cloned(),
            (GraphNode::Struct { fields, .. }, Key::Name(name)) => fields
                .iter()
                .find(|(k, _)| k == name)
                .map(|(_, v)| v.clone()),
            _ => None,
        }
    }

    /// Записывает ребёнка по ключу. Для словаря — вставка с сохранением
    /// сортировки, для структуры новое поле добавляется в конец объявленного
    /// порядка, для списка допускается индекс `len` (дозапись в хвост).
    pub fn set(&self, key: &Key, value: Object) -> GraphResult<()> {
        let node_type = self.node_type();
        match (&mut *self.body.borrow_mut(), key) {
            (GraphNode::Dict(entries), Key::Name(name)) => {
                if let Some(slot) = entries.iter_mut().find(|(k, _)| k == name) {
                    slot.1 = value;
                } else {
                    let pos = entries
                        .iter()
                        .position(|(k, _)| k.as_str() > name.as_str())
                        .unwrap_or(entries.len());
                    entries.insert(pos, (name.clone(), value));
                }
                Ok(())
            }
            (GraphNode::List(items), Key::Index(i)) => {
                if *i < items.len() {
                    items[*i] = value;
                    Ok(())
                } else if *i == items.len() {
                    items.push(value);
                    Ok(())
                } else {
                    Err(GraphError::StructureMismatch(format!(
                        "индекс {} вне списка длины {}",
                        i,
                        items.len()
                    )))
                }
            }
            (GraphNode::Struct { fields, .. }, Key::Name(name)) => {
                if let Some(slot) = fields.iter_mut().find(|(k, _)| k == name) {
                    slot.1 = value;
                } else {
                    fields.push((name.clone(), value));
                }
                Ok(())
            }
            (_, key) => Err(GraphError::StructureMismatch(format!(
                "ключ '{}' не подходит узлу типа '{}'",
                key, node_type
            ))),
        }
    }

    pub fn remove(&self, key: &Key) -> Option<Object> {
        match (&mut *self.body.borrow_mut(), key) {
            (GraphNode::Dict(entries), Key::Name(name)) => {
                let pos = entries.iter().position(|(k, _)| k == name)?;
                Some(entries.remove(pos).1)
            }
            (GraphNode::List(items), Key::Index(i)) => {
                if *i < items.len() {
                    Some(items.remove(*i))
                } else {
                    None
                }
            }
            (GraphNode::Struct { fields, .. }, Key::Name(name)) => {
                let pos = fields.iter().position(|(k, _)| k == name)?;
                Some(fields.remove(pos).1)
            }
            _ => None,
        }
    }

    /// Полностью перестраивает детей узла, сохраняя его тип и идентичность.
    /// Используется при восстановлении в существующий объект из кэша.
    pub(crate) fn replace_entries(&self, entries: Vec<(Key, Object)>) -> GraphResult<()> {
        let node_type = self.node_type();
        let mut body = self.body.borrow_mut();
        match &mut *body {
            GraphNode::Dict(slots) => {
                slots.clear();
                for (key, value) in entries {
                    match key {
                        Key::Name(name) => slots.push((name, value)),
                        Key::Index(i) => {
                            return Err(GraphError::StructureMismatch(format!(
                                "ключ '{}' не подходит узлу типа '{}'",
                                i, node_type
                            )))
                        }
                    }
                }
                Ok(())
            }
            GraphNode::List(items) => {
                items.clear();
                for (key, value) in entries {
                    match key {
                        Key::Index(_) => items.push(value),
                        Key::Name(name) => {
                            return Err(GraphError::StructureMismatch(format!(
                                "ключ '{}' не подходит узлу типа '{}'",
                                name, node_type
                            )))
                        }
                    }
                }
                Ok(())
            }
            GraphNode::Struct { fields, .. } => {
                fields.clear();
                for (key, value) in entries {
                    match key {
                        Key::Name(name) => fields.push((name, value)),
                        Key::Index(i) => {
                            return Err(GraphError::StructureMismatch(format!(
                                "ключ '{}' не подходит узлу типа '{}'",
                                i, node_type
                            )))
                        }
                    }
                }
                Ok(())
            }
        }
    }

    pub fn ptr_eq(&self, other: &NodeHandle) -> bool {
        Rc::ptr_eq(&self.body, &other.body)
    }

    /// Адрес для индекса идентичности (RefMap).
    pub(crate) fn id(&self) -> usize {
        Rc::as_ptr(&self.body) as *const () as usize
    }
}

impl fmt::Debug for NodeHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // тело может быть циклическим: печатаем только тип и размер
        write!(f, "NodeHandle({}, len={})", self.node_type(), self.len())
    }
}

/// Полиморфный объект живого графа.
#[derive(Clone, Debug)]
pub enum Object {
    /// Переменная — носитель изменяемого состояния с идентичностью.
    Variable(Variable),
    /// Узел-контейнер с идентичностью.
    Node(NodeHandle),
    /// Зарегистрированный внешний контейнер без идентичности.
    Pytree(PytreeHandle),
    /// Непрозрачный массивоподобный лист без обёртки-переменной.
    Leaf(Value),
    /// Статическое значение, встраиваемое в GraphDef.
    Static(StaticValue),
}

impl Object {
    /// Идентичность объекта, если она у него есть.
    pub(crate) fn identity_id(&self) -> Option<usize> {
        match self {
            Object::Variable(v) => Some(v.id()),
            Object::Node(n) => Some(n.id()),
            _ => None,
        }
    }

    pub fn as_variable(&self) -> Option<&Variable> {
        match self {
            Object::Variable(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_node(&self) -> Option<&NodeHandle> {
        match self {
            Object::Node(n) => Some(n),
            _ => None,
        }
    }

    pub fn as_static(&self) -> Option<&StaticValue> {
        match self {
            Object::Static(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_leaf(&self) -> Option<&Value> {
        match self {
            Object::Leaf(v) => Some(v),
            _ => None,
        }
    }

    /// Идентичны ли два объекта (для объектов без идентичности — false).
    pub fn is_same(&self, other: &Object) -> bool {
        match (self, other) {
            (Object::Variable(a), Object::Variable(b)) => a.ptr_eq(b),
            (Object::Node(a), Object::Node(b)) => a.ptr_eq(b),
            _ => false,
        }
    }

    /// Короткое имя рода объекта для сообщений об ошибках.
    pub fn kind_name(&self) -> String {
        match self {
            Object::Variable(v) => format!("Variable({})", v.kind()),
            Object::Node(n) => n.node_type().to_string(),
            Object::Pytree(p) => format!("pytree({})", p.type_tag()),
            Object::Leaf(_) => "leaf".to_string(),
            Object::Static(_) => "static".to_string(),
        }
    }
}

impl From<Variable> for Object {
    fn from(v: Variable) -> Self {
        Object::Variable(v)
    }
}

impl From<NodeHandle> for Object {
    fn from(n: NodeHandle) -> Self {
        Object::Node(n)
    }
}

impl From<Value> for Object {
    fn from(v: Value) -> Self {
        Object::Leaf(v)
    }
}

impl From<StaticValue> for Object {
    fn from(s: StaticValue) -> Self {
        Object::Static(s)
    }
}
