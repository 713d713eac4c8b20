//! Демонстрация чекпоинтов: State модели сохраняется на диск
//! (SafeTensors + JSON) и восстанавливается в живой граф.

use rustyosg::graph::{split, update, NodeHandle, Object};
use rustyosg::serialization::{CheckpointConfig, CheckpointManager};
use rustyosg::value::Value;
use rustyosg::variable::Variable;

use ndarray::{ArrayD, IxDyn};

fn main() {
    env_logger::init();

    let model = Object::Node(NodeHandle::structure(
        "Mlp",
        vec![
            (
                "w",
                Object::Variable(Variable::param(Value::Tensor(ArrayD::from_elem(
                    IxDyn(&[2, 2]),
                    1.0,
                )))),
            ),
            (
                "steps",
                Object::Variable(Variable::cache(Value::ScalarI32(0))),
            ),
        ],
    ));

    let mut manager = CheckpointManager::new("demo_checkpoints", 3);

    // несколько «шагов обучения» с сохранением
    for step in 1..=3 {
        for (_, obj) in rustyosg::graph::iter_graph(&model) {
            if let Object::Variable(var) = obj {
                match var.raw_value() {
                    Value::Tensor(arr) => var
                        .set_value(Value::Tensor(arr.mapv(|x| x + 0.1)))
                        .expect("set_value failed"),
                    Value::ScalarI32(n) => var
                        .set_value(Value::ScalarI32(n + 1))
                        .expect("set_value failed"),
                    _ => {}
                }
            }
        }

        let (_graphdef, state) = split(&model).expect("split failed");
        let config = CheckpointConfig::new().with_model_name("mlp").with_step(step);
        let path = manager.save(&state, &config).expect("save failed");
        println!("шаг {}: чекпоинт в {}", step, path.display());
    }

    // откат модели к последнему чекпоинту
    let (state, config) = manager
        .load_latest()
        .expect("load failed")
        .expect("нет чекпоинтов");
    println!("загружен чекпоинт шага {}", config.step);
    update(&model, state).expect("update failed");

    let steps = model
        .as_node()
        .unwrap()
        .get(&rustyosg::graph::Key::from("steps"))
        .unwrap();
    println!(
        "steps после восстановления: {:?}",
        steps.as_variable().unwrap().raw_value()
    );

    std::fs::remove_dir_all("demo_checkpoints").ok();
}
