//! GraphDef: неизменяемое структурное описание графа.
//!
//! Описание хэшируемо и сериализуемо: вся динамика (значения переменных и
//! листьев) вынесена в State, здесь остаются только форма графа, типы узлов,
//! статические значения и ссылки назад на уже пронумерованные объекты.
//! Нумерация индексов локальна для одного вызова flatten.

use crate::graph::object::{NodeType, StaticValue};
use crate::graph::state::Key;
use crate::graph::{GraphError, GraphResult};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// Индекс идентичности внутри одного описания.
pub type Index = usize;

/// Описание первого вхождения узла-контейнера.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NodeDef {
    pub node_type: NodeType,
    pub index: Index,
    /// Дети в каноническом порядке обхода.
    pub attributes: Vec<(Key, GraphDef)>,
    /// Таблица соответствия «внешний индекс -> внутренний индекс»,
    /// подшиваемая внутренним split внутри update-контекста.
    pub index_mapping: Option<Vec<(Index, Index)>>,
}

/// Описание pytree-контейнера: без индекса, без идентичности.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PytreeDef {
    pub type_tag: String,
    pub attributes: Vec<(Key, GraphDef)>,
    pub meta: StaticValue,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum GraphDef {
    /// Первое вхождение узла-контейнера.
    Node(NodeDef),
    /// Ссылка на уже описанный узел: так представляются разделяемые
    /// ссылки и циклы.
    NodeRef { index: Index },
    /// Первое вхождение переменной; снимок лежит в State по этому пути.
    Variable { index: Index },
    /// Повторное вхождение разделяемой переменной: в State записи нет.
    VariableRef { index: Index },
    /// Pytree-контейнер.
    Pytree(PytreeDef),
    /// Непрозрачный лист; значение лежит в State по этому пути.
    Leaf,
    /// Статическое значение, встроенное в описание.
    Static(StaticValue),
}

impl GraphDef {
    pub fn is_node(&self) -> bool {
        matches!(self, GraphDef::Node(_))
    }

    pub fn is_node_ref(&self) -> bool {
        matches!(self, GraphDef::NodeRef { .. })
    }

    pub fn index_mapping(&self) -> Option<&[(Index, Index)]> {
        match self {
            GraphDef::Node(def) => def.index_mapping.as_deref(),
            _ => None,
        }
    }

    /// Защитная проверка целостности для описаний из недоверенного
    /// источника: каждая ссылка обязана разрешаться в уже встреченное
    /// определение того же рода. Для описаний, порождённых этим движком,
    /// нарушение — ошибка реализации.
    pub fn validate(&self) -> GraphResult<()> {
        let mut nodes: HashSet<Index> = HashSet::new();
        let mut variables: HashSet<Index> = HashSet::new();
        validate_def(self, &mut nodes, &mut variables)
    }
}

fn validate_def(
    def: &GraphDef,
    nodes: &mut HashSet<Index>,
    variables: &mut HashSet<Index>,
) -> GraphResult<()> {
    match def {
        GraphDef::Node(node) => {
            if !nodes.insert(node.index) || variables.contains(&node.index) {
                return Err(GraphError::StructureCorruption(node.index));
            }
            for (_, child) in &node.attributes {
                validate_def(child, nodes, variables)?;
            }
            Ok(())
        }
        GraphDef::NodeRef { index } => {
            if nodes.contains(index) {
                Ok(())
            } else {
                Err(GraphError::StructureCorruption(*index))
            }
        }
        GraphDef::Variable { index } => {
            if !variables.insert(*index) || nodes.contains(index) {
                return Err(GraphError::StructureCorruption(*index));
            }
            Ok(())
        }
        GraphDef::VariableRef { index } => {
            if variables.contains(index) {
                Ok(())
            } else {
                Err(GraphError::StructureCorruption(*index))
            }
        }
        GraphDef::Pytree(tree) => {
            for (_, child) in &tree.attributes {
                validate_def(child, nodes, variables)?;
            }
            Ok(())
        }
        GraphDef::Leaf | GraphDef::Static(_) => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dangling_ref_is_corruption() {
        let def = GraphDef::Node(NodeDef {
            node_type: NodeType::List,
            index: 0,
            attributes: vec![(Key::Index(0), GraphDef::NodeRef { index: 7 })],
            index_mapping: None,
        });
        assert_eq!(def.validate(), Err(GraphError::StructureCorruption(7)));
    }

    #[test]
    fn test_self_reference_validates() {
        let def = GraphDef::Node(NodeDef {
            node_type: NodeType::Struct("Foo".into()),
            index: 0,
            attributes: vec![(Key::from("me"), GraphDef::NodeRef { index: 0 })],
            index_mapping: None,
        });
        def.validate().unwrap();
    }

    #[test]
    fn test_variable_ref_to_node_index_is_corruption() {
        let def = GraphDef::Node(NodeDef {
            node_type: NodeType::List,
            index: 0,
            attributes: vec![(Key::Index(0), GraphDef::VariableRef { index: 0 })],
            index_mapping: None,
        });
        assert!(def.validate().is_err());
    }

    #[test]
    fn test_serde_and_hash() {
        use std::collections::hash_map::DefaultHasher;
        use std::hash::{Hash, Hasher};

        let def = GraphDef::Node(NodeDef {
            node_type: NodeType::Dict,
            index: 0,
            attributes: vec![
                (Key::from("a"), GraphDef::Static(StaticValue::Int(1))),
                (Key::from("b"), GraphDef::Variable { index: 1 }),
            ],
            index_mapping: None,
        });
        let json = serde_json::to_string(&def).unwrap();
        let back: GraphDef = serde_json::from_str(&json).unwrap();
        assert_eq!(def, back);

        let mut h1 = DefaultHasher::new();
        let mut h2 = DefaultHasher::new();
        def.hash(&mut h1);
        back.hash(&mut h2);
        assert_eq!(h1.finish(), h2.finish());
    }
}
