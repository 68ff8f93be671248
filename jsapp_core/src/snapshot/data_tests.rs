use super::buffer::{ReadBuffer, WriteBuffer};
use super::data::*;
use super::named_indexes::NamedIndexes;
use crate::modules::ModuleType;
use crate::prelude::*;

fn sample_app_data() -> AppSnapData {
  let mut context_indexes = NamedIndexes::default();
  context_indexes.add_named_index(0, "v8-default").unwrap();
  context_indexes.add_named_index(1, "main").unwrap();

  let mut runtime_indexes = NamedIndexes::default();
  runtime_indexes.add_named_index(0, "R1").unwrap();

  AppSnapData {
    name: "sample".to_string(),
    version: "1.2.3".to_string(),
    runtime_indexes,
    runtimes: vec![RuntimeSnapData {
      name: "R1".to_string(),
      idle_enabled: true,
      context_indexes,
      contexts: vec![
        ContextSnapData {
          name: "v8-default".to_string(),
          namespace: String::new(),
          entry_point: String::new(),
          modules: vec![],
        },
        ContextSnapData {
          name: "main".to_string(),
          namespace: "app".to_string(),
          entry_point: "%JS%/main.js".to_string(),
          modules: vec![
            ModuleSnapData {
              path: "/root/js/main.js".to_string(),
              name: "main".to_string(),
              version: None,
              module_type: ModuleType::Javascript,
            },
            ModuleSnapData {
              path: "/root/modules/pkg/1.0.0/conf.json".to_string(),
              name: "pkg".to_string(),
              version: Some("1.0.0".to_string()),
              module_type: ModuleType::Json,
            },
          ],
        },
      ],
      function_templates: vec![FuncTplSnapData {
        data_index: 0,
        class_name: String::new(),
        function_name: "mark".to_string(),
        namespace: "app".to_string(),
      }],
      startup_data: vec![0xca, 0xfe, 0xba, 0xbe],
    }],
  }
}

// Everything written comes back field for field, modulo nothing.
#[test]
fn app_round_trip1() {
  let data = sample_app_data();
  let mut buffer = WriteBuffer::new();
  data.serialize(&mut buffer);
  let bytes = buffer.into_bytes();

  let mut reader = ReadBuffer::new(&bytes);
  let restored = AppSnapData::deserialize(&mut reader).unwrap();

  assert_eq!(restored.name, data.name);
  assert_eq!(restored.version, data.version);
  assert_eq!(restored.runtime_indexes, data.runtime_indexes);
  assert_eq!(restored.runtimes.len(), 1);

  let runtime = &restored.runtimes[0];
  let original = &data.runtimes[0];
  assert_eq!(runtime.name, original.name);
  assert_eq!(runtime.idle_enabled, original.idle_enabled);
  assert_eq!(runtime.context_indexes, original.context_indexes);
  assert_eq!(runtime.contexts, original.contexts);
  assert_eq!(runtime.function_templates, original.function_templates);
  assert_eq!(runtime.startup_data, original.startup_data);
}

#[test]
fn truncated_fails1() {
  let data = sample_app_data();
  let mut buffer = WriteBuffer::new();
  data.serialize(&mut buffer);
  let bytes = buffer.into_bytes();

  let mut reader = ReadBuffer::new(&bytes[..bytes.len() / 2]);
  assert!(matches!(
    AppSnapData::deserialize(&mut reader),
    Err(TheErr::CorruptSnapshot(_))
  ));
}

#[test]
fn unknown_module_type_fails1() {
  let mut buffer = WriteBuffer::new();
  buffer.write_string("/root/js/x.wasm");
  buffer.write_string("x");
  buffer.write_option_string(None);
  buffer.write_string("wasm");
  let bytes = buffer.into_bytes();

  let mut reader = ReadBuffer::new(&bytes);
  assert!(matches!(
    ModuleSnapData::deserialize(&mut reader),
    Err(TheErr::CorruptSnapshot(_))
  ));
}

#[test]
fn runtime_count_mismatch_fails1() {
  let mut data = sample_app_data();
  data.runtimes.push(RuntimeSnapData::default());
  let mut buffer = WriteBuffer::new();
  data.serialize(&mut buffer);
  let bytes = buffer.into_bytes();

  let mut reader = ReadBuffer::new(&bytes);
  assert!(matches!(
    AppSnapData::deserialize(&mut reader),
    Err(TheErr::CorruptSnapshot(_))
  ));
}
