// --- Файл: src/serialization/mod.rs ---

//! Модуль для сохранения и загрузки состояния графа.
//!
//! State — это упорядоченное отображение «путь -> снимок», и любой внешний
//! формат, точно восстанавливающий пути и порядок, годится для его
//! персистентности. Здесь поддержаны:
//! - **SafeTensors**: безопасный бинарный формат для тензорных записей
//! - **JSON**: человекочитаемый формат для порядка, видов и метаданных
//! - **Checkpoint**: полный снимок State с конфигурацией обучения
//!
//! # Примеры
//!
//! ```rust,ignore
//! use rustyosg::graph::split;
//! use rustyosg::serialization::{save_checkpoint, load_checkpoint, CheckpointConfig};
//!
//! let (graphdef, state) = split(&model)?;
//! let config = CheckpointConfig::new().with_model_name("mlp").with_step(100);
//! save_checkpoint("checkpoints/step100", &state, &config)?;
//!
//! let (restored, config) = load_checkpoint("checkpoints/step100")?;
//! ```

pub mod checkpoint;
pub mod safetensors_io;

pub use checkpoint::{
    load_checkpoint, save_checkpoint, CheckpointConfig, CheckpointError, CheckpointManager,
};
pub use safetensors_io::{load_state_tensors, save_state_tensors, SafeTensorsError};
