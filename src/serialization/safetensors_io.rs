// --- Файл: src/serialization/safetensors_io.rs ---

//! Модуль для работы с форматом SafeTensors.
//!
//! В SafeTensors уходят только тензорные записи State: ключом служит
//! строковый путь слота (`layers.0.w`). Скалярные записи, виды переменных
//! и метаданные живут в JSON-части чекпоинта — см. [`super::checkpoint`].

use crate::graph::State;
use crate::value::Value;
use ndarray::ArrayD;
use safetensors::serialize_to_file;
use safetensors::tensor::{SafeTensors, TensorView};
use std::collections::HashMap;
use std::fs::File;
use std::io::Read;
use std::path::Path;
use thiserror::Error;

/// Ошибки при работе с SafeTensors
#[derive(Error, Debug)]
pub enum SafeTensorsError {
    #[error("Ошибка ввода/вывода: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Ошибка SafeTensors: {0}")]
    SafeTensorsError(#[from] safetensors::SafeTensorError),

    #[error("Неподдерживаемый тип данных: {0}")]
    UnsupportedDtype(String),

    #[error("Ошибка формы тензора: ожидалось {expected:?}, получено {actual:?}")]
    ShapeMismatch {
        expected: Vec<usize>,
        actual: Vec<usize>,
    },

    #[error("Тензор '{0}' не найден")]
    TensorNotFound(String),
}

type Result<T> = std::result::Result<T, SafeTensorsError>;

/// Сохраняет тензорные записи State в файл SafeTensors.
///
/// Нетензорные записи (скаляры) пропускаются: их переносит JSON-часть
/// чекпоинта вместе с порядком и метаданными.
pub fn save_state_tensors<P: AsRef<Path>>(path: P, state: &State) -> Result<()> {
    let mut data_storage: Vec<(String, Vec<usize>, Vec<u8>)> = Vec::new();

    // Сначала конвертируем все данные в байты
    for (slot_path, entry) in state.iter() {
        if let Value::Tensor(arr) = entry.value() {
            let data: Vec<u8> = arr.iter().flat_map(|&x| x.to_le_bytes()).collect();
            data_storage.push((slot_path.to_string(), arr.shape().to_vec(), data));
        }
    }

    // Теперь создаем TensorView, ссылающиеся на data_storage
    let mut tensor_views: Vec<(&str, TensorView<'_>)> = Vec::new();
    for (name, shape, data) in &data_storage {
        tensor_views.push((
            name.as_str(),
            TensorView::new(safetensors::Dtype::F32, shape.clone(), data)?,
        ));
    }

    serialize_to_file(tensor_views, &None, path.as_ref())?;

    Ok(())
}

/// Загружает тензоры из файла SafeTensors: путь слота -> значение.
pub fn load_state_tensors<P: AsRef<Path>>(path: P) -> Result<HashMap<String, Value>> {
    let mut file = File::open(path)?;
    let mut buffer = Vec::new();
    file.read_to_end(&mut buffer)?;

    let tensors = SafeTensors::deserialize(&buffer)?;

    let mut result = HashMap::new();

    for (name, tensor) in tensors.tensors() {
        match tensor.dtype() {
            safetensors::Dtype::F32 => {
                let shape: Vec<usize> = tensor.shape().to_vec();
                let data = tensor.data();

                let floats: Vec<f32> = data
                    .chunks_exact(4)
                    .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
                    .collect();

                let floats_len = floats.len();

                let arr = ArrayD::from_shape_vec(ndarray::IxDyn(&shape), floats).map_err(|_| {
                    SafeTensorsError::ShapeMismatch {
                        expected: shape.clone(),
                        actual: vec![floats_len],
                    }
                })?;

                result.insert(name.to_string(), Value::Tensor(arr));
            }
            safetensors::Dtype::F64 => {
                // Конвертируем f64 в f32
                let shape: Vec<usize> = tensor.shape().to_vec();
                let data = tensor.data();

                let floats: Vec<f32> = data
                    .chunks_exact(8)
                    .map(|chunk| {
                        let val = f64::from_le_bytes([
                            chunk[0], chunk[1], chunk[2], chunk[3], chunk[4], chunk[5], chunk[6],
                            chunk[7],
                        ]);
                        val as f32
                    })
                    .collect();

                let floats_len = floats.len();

                let arr = ArrayD::from_shape_vec(ndarray::IxDyn(&shape), floats).map_err(|_| {
                    SafeTensorsError::ShapeMismatch {
                        expected: shape.clone(),
                        actual: vec![floats_len],
                    }
                })?;

                result.insert(name.to_string(), Value::Tensor(arr));
            }
            other => {
                return Err(SafeTensorsError::UnsupportedDtype(format!("{:?}", other)));
            }
        }
    }

    Ok(result)
}

/// Загружает конкретный тензор по пути слота.
pub fn load_tensor<P: AsRef<Path>>(path: P, name: &str) -> Result<Value> {
    let tensors = load_state_tensors(path)?;
    tensors
        .get(name)
        .cloned()
        .ok_or_else(|| SafeTensorsError::TensorNotFound(name.to_string()))
}

/// Возвращает список путей слотов в файле SafeTensors.
pub fn list_tensors<P: AsRef<Path>>(path: P) -> Result<Vec<String>> {
    let mut file = File::open(path)?;
    let mut buffer = Vec::new();
    file.read_to_end(&mut buffer)?;

    let tensors = SafeTensors::deserialize(&buffer)?;
    Ok(tensors.names().iter().map(|s| s.to_string()).collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{Path as SlotPath, StateEntry};
    use crate::variable::{kinds, VariableState};
    use std::fs;

    fn sample_state() -> State {
        let mut state = State::new();
        state
            .insert(
                SlotPath::root().key("layer").key("w"),
                StateEntry::Variable(VariableState::new(
                    kinds::PARAM,
                    Value::Tensor(
                        ArrayD::from_shape_vec(
                            ndarray::IxDyn(&[2, 3]),
                            vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0],
                        )
                        .unwrap(),
                    ),
                )),
            )
            .unwrap();
        state
            .insert(
                SlotPath::root().key("count"),
                StateEntry::Leaf(Value::ScalarI32(7)),
            )
            .unwrap();
        state
    }

    #[test]
    fn test_save_load_state_tensors() {
        let state = sample_state();
        let path = "test_state_tensors.safetensors";

        save_state_tensors(path, &state).expect("Failed to save");
        let loaded = load_state_tensors(path).expect("Failed to load");

        // скалярная запись не попадает в файл тензоров
        assert_eq!(loaded.len(), 1);
        let tensor = loaded.get("layer.w").expect("missing slot");
        assert_eq!(tensor.shape(), vec![2, 3]);

        fs::remove_file(path).ok();
    }

    #[test]
    fn test_list_tensors() {
        let state = sample_state();
        let path = "test_state_list.safetensors";
        save_state_tensors(path, &state).expect("Failed to save");

        let names = list_tensors(path).expect("Failed to list");
        assert_eq!(names, vec!["layer.w".to_string()]);

        fs::remove_file(path).ok();
    }
}
