//! Движок графа объектов: flatten / unflatten / split / merge.
//!
//! Живой граф (изменяемый, с разделяемыми ссылками и циклами) превращается
//! в пару (GraphDef, State): неизменяемое структурное описание плюс плоское
//! упорядоченное состояние. Пара пересекает границу чистой функции и
//! восстанавливается обратно — при необходимости в те же самые объекты
//! (по идентичности), из которых была получена.

pub mod context;
pub mod flatten;
pub mod graphdef;
pub mod object;
pub mod refmap;
pub mod state;
pub mod unflatten;

pub use context::{merge_context, split_context, MergeContext, SplitContext, UpdateContext};
pub use flatten::{flatten, iter_graph, split};
pub use graphdef::{GraphDef, Index, NodeDef, PytreeDef};
pub use object::{GraphNode, NodeHandle, NodeType, Object, StaticValue};
pub use refmap::{compose_mapping, compose_mapping_reversed, IndexRef, RefMap};
pub use state::{Key, Path, State, StateEntry};
pub use unflatten::{clone_graph, merge, merge_with, unflatten, update, update_static};

use crate::variable::VariableError;
use thiserror::Error;

pub type GraphResult<T> = std::result::Result<T, GraphError>;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum GraphError {
    /// State и GraphDef расходятся по форме: пользователь передал чужой
    /// или устаревший снимок.
    #[error("Несовпадение структуры: {0}")]
    StructureMismatch(String),

    /// Повреждённый GraphDef: висячая ссылка или слот не того рода.
    /// Для описаний, порождённых этим движком, недостижимо.
    #[error("Повреждение структуры: висячая ссылка на индекс {0}")]
    StructureCorruption(Index),

    /// Один и тот же объект разделён с разными префиксами внутри
    /// одного контекста.
    #[error("Несогласованный алиасинг: объект разделён с префиксами '{0}' и '{1}'")]
    AliasingInconsistency(String, String),

    /// Попытка обновить узел узлом другого типа.
    #[error("Попытка обновить узел другим типом: ожидался '{expected}', получен '{actual}'")]
    NodeTypeMismatch { expected: String, actual: String },

    /// Попытка добавить уже разделяемый узел как новый.
    #[error("Попытка добавить разделяемый узел по пути '{0}'")]
    SharedNodeInsert(String),

    /// В реестре нет recompose-функции для такого pytree-типа.
    #[error("Незарегистрированный pytree-тип '{0}'")]
    UnknownPytreeType(String),

    /// Два слота с одинаковым путём в одном State.
    #[error("Дублирующийся путь '{0}' в State")]
    DuplicatePath(String),

    #[error("Переменная: {0}")]
    Variable(#[from] VariableError),
}
