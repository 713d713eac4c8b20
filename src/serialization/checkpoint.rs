// --- Файл: src/serialization/checkpoint.rs ---

//! Модуль для создания и загрузки чекпоинтов состояния графа.
//!
//! Чекпоинт включает:
//! - Тензорные записи State (в формате SafeTensors)
//! - Порядок записей, виды переменных, метаданные и скалярные значения (JSON)
//! - Метаданные обучения (шаг, loss, и т.д.)
//!
//! State восстанавливается в точности: тот же порядок записей, те же виды
//! и метаданные переменных.

use super::safetensors_io::{load_state_tensors, save_state_tensors, SafeTensorsError};
use crate::graph::{Path as SlotPath, State, StateEntry};
use crate::value::Value;
use crate::variable::{MetaValue, VariableState};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fs::{self, File};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Ошибки при работе с чекпоинтами
#[derive(Error, Debug)]
pub enum CheckpointError {
    #[error("Ошибка ввода/вывода: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Ошибка SafeTensors: {0}")]
    SafeTensorsError(#[from] SafeTensorsError),

    #[error("Ошибка JSON: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("Директория чекпоинта не существует: {0}")]
    DirectoryNotFound(PathBuf),

    #[error("Файл не найден: {0}")]
    FileNotFound(PathBuf),

    #[error("Неверный формат чекпоинта: {0}")]
    InvalidFormat(String),
}

type Result<T> = std::result::Result<T, CheckpointError>;

/// Конфигурация чекпоинта
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckpointConfig {
    /// Версия формата чекпоинта
    pub version: String,
    /// Название модели
    pub model_name: Option<String>,
    /// Глобальный шаг обучения
    pub step: usize,
    /// Последнее значение loss
    pub last_loss: Option<f32>,
    /// Дополнительные метаданные
    pub metadata: HashMap<String, String>,
}

impl Default for CheckpointConfig {
    fn default() -> Self {
        Self {
            version: "1.0".to_string(),
            model_name: None,
            step: 0,
            last_loss: None,
            metadata: HashMap::new(),
        }
    }
}

impl CheckpointConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_model_name(mut self, name: &str) -> Self {
        self.model_name = Some(name.to_string());
        self
    }

    pub fn with_step(mut self, step: usize) -> Self {
        self.step = step;
        self
    }

    pub fn with_last_loss(mut self, loss: f32) -> Self {
        self.last_loss = Some(loss);
        self
    }

    pub fn with_metadata(mut self, key: &str, value: &str) -> Self {
        self.metadata.insert(key.to_string(), value.to_string());
        self
    }
}

/// Одна запись State в JSON-части чекпоинта. Тензорные значения вынесены
/// в SafeTensors и находятся по строковому пути слота.
#[derive(Debug, Serialize, Deserialize)]
struct EntryRecord {
    path: SlotPath,
    /// Вид переменной; None — неупакованный лист.
    kind: Option<String>,
    #[serde(default)]
    metadata: BTreeMap<String, MetaValue>,
    /// Скалярное значение; None — значение лежит в SafeTensors.
    scalar: Option<Value>,
}

/// Сохраняет State в директорию.
///
/// Структура директории:
/// ```text
/// checkpoint_dir/
/// ├── config.json          # Конфигурация и метаданные
/// ├── state.json           # Порядок записей, виды, метаданные, скаляры
/// └── state.safetensors    # Тензорные значения
/// ```
pub fn save_checkpoint<P: AsRef<Path>>(
    path: P,
    state: &State,
    config: &CheckpointConfig,
) -> Result<()> {
    let dir = path.as_ref();

    fs::create_dir_all(dir)?;

    // Конфигурация
    let config_path = dir.join("config.json");
    let config_json = serde_json::to_string_pretty(config)?;
    let mut config_file = File::create(&config_path)?;
    config_file.write_all(config_json.as_bytes())?;

    // Описание записей в порядке обхода
    let mut records: Vec<EntryRecord> = Vec::with_capacity(state.len());
    for (slot_path, entry) in state.iter() {
        let record = match entry {
            StateEntry::Variable(vs) => EntryRecord {
                path: slot_path.clone(),
                kind: Some(vs.kind.clone()),
                metadata: vs.metadata.clone(),
                scalar: if vs.value.is_tensor() {
                    None
                } else {
                    Some(vs.value.clone())
                },
            },
            StateEntry::Leaf(value) => EntryRecord {
                path: slot_path.clone(),
                kind: None,
                metadata: BTreeMap::new(),
                scalar: if value.is_tensor() {
                    None
                } else {
                    Some(value.clone())
                },
            },
        };
        records.push(record);
    }
    let state_path = dir.join("state.json");
    let state_json = serde_json::to_string_pretty(&records)?;
    let mut state_file = File::create(&state_path)?;
    state_file.write_all(state_json.as_bytes())?;

    // Тензорные значения
    let tensors_path = dir.join("state.safetensors");
    save_state_tensors(&tensors_path, state)?;

    Ok(())
}

/// Загружает State из директории чекпоинта.
pub fn load_checkpoint<P: AsRef<Path>>(path: P) -> Result<(State, CheckpointConfig)> {
    let dir = path.as_ref();

    if !dir.exists() {
        return Err(CheckpointError::DirectoryNotFound(dir.to_path_buf()));
    }

    // Конфигурация
    let config_path = dir.join("config.json");
    if !config_path.exists() {
        return Err(CheckpointError::FileNotFound(config_path));
    }
    let mut config_file = File::open(&config_path)?;
    let mut config_str = String::new();
    config_file.read_to_string(&mut config_str)?;
    let config: CheckpointConfig = serde_json::from_str(&config_str)?;

    // Описание записей
    let state_path = dir.join("state.json");
    if !state_path.exists() {
        return Err(CheckpointError::FileNotFound(state_path));
    }
    let mut state_file = File::open(&state_path)?;
    let mut state_str = String::new();
    state_file.read_to_string(&mut state_str)?;
    let records: Vec<EntryRecord> = serde_json::from_str(&state_str)?;

    // Тензорные значения
    let tensors_path = dir.join("state.safetensors");
    if !tensors_path.exists() {
        return Err(CheckpointError::FileNotFound(tensors_path));
    }
    let mut tensors = load_state_tensors(&tensors_path)?;

    // Сборка State в сохранённом порядке
    let mut state = State::new();
    for record in records {
        let value = match record.scalar {
            Some(value) => value,
            None => tensors.remove(&record.path.to_string()).ok_or_else(|| {
                CheckpointError::InvalidFormat(format!(
                    "нет тензора для записи '{}'",
                    record.path
                ))
            })?,
        };
        let entry = match record.kind {
            Some(kind) => StateEntry::Variable(VariableState::with_metadata(
                kind,
                value,
                record.metadata,
            )),
            None => StateEntry::Leaf(value),
        };
        state
            .insert(record.path, entry)
            .map_err(|e| CheckpointError::InvalidFormat(e.to_string()))?;
    }

    Ok((state, config))
}

/// Менеджер чекпоинтов для автоматического сохранения.
pub struct CheckpointManager {
    /// Базовая директория для чекпоинтов
    pub base_dir: PathBuf,
    /// Максимальное количество сохраняемых чекпоинтов
    pub max_to_keep: usize,
    /// Список существующих чекпоинтов
    checkpoints: Vec<PathBuf>,
}

impl CheckpointManager {
    pub fn new<P: AsRef<Path>>(base_dir: P, max_to_keep: usize) -> Self {
        Self {
            base_dir: base_dir.as_ref().to_path_buf(),
            max_to_keep,
            checkpoints: Vec::new(),
        }
    }

    /// Сохраняет чекпоинт с автоматическим именем.
    pub fn save(&mut self, state: &State, config: &CheckpointConfig) -> Result<PathBuf> {
        let checkpoint_name = format!("checkpoint_step{}", config.step);
        let checkpoint_path = self.base_dir.join(&checkpoint_name);

        save_checkpoint(&checkpoint_path, state, config)?;
        self.checkpoints.push(checkpoint_path.clone());

        // Удаляем старые чекпоинты если превышен лимит
        while self.checkpoints.len() > self.max_to_keep {
            let old_path = self.checkpoints.remove(0);
            if old_path.exists() {
                fs::remove_dir_all(&old_path)?;
            }
        }

        Ok(checkpoint_path)
    }

    /// Загружает последний чекпоинт.
    pub fn load_latest(&self) -> Result<Option<(State, CheckpointConfig)>> {
        let checkpoints = if self.checkpoints.is_empty() {
            self.find_checkpoints()?
        } else {
            self.checkpoints.clone()
        };
        match checkpoints.last() {
            Some(latest) => Ok(Some(load_checkpoint(latest)?)),
            None => Ok(None),
        }
    }

    /// Ищет существующие чекпоинты в базовой директории.
    fn find_checkpoints(&self) -> Result<Vec<PathBuf>> {
        if !self.base_dir.exists() {
            return Ok(Vec::new());
        }

        let mut checkpoints: Vec<PathBuf> = fs::read_dir(&self.base_dir)?
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.path())
            .filter(|path| {
                path.is_dir()
                    && path
                        .file_name()
                        .map(|n| n.to_string_lossy().starts_with("checkpoint_"))
                        .unwrap_or(false)
            })
            .collect();

        checkpoints.sort();
        Ok(checkpoints)
    }
}
