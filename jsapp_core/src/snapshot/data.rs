//! Snapshot records for the App -> Runtime -> Context -> Module hierarchy.

use crate::modules::ModuleType;
use crate::prelude::*;
use crate::snapshot::buffer::{ReadBuffer, WriteBuffer};
use crate::snapshot::named_indexes::NamedIndexes;

/// One module's serializable tuple.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModuleSnapData {
  pub path: String,
  pub name: String,
  pub version: Option<String>,
  pub module_type: ModuleType,
}

impl ModuleSnapData {
  pub fn serialize(&self, buffer: &mut WriteBuffer) {
    buffer.write_string(&self.path);
    buffer.write_string(&self.name);
    buffer.write_option_string(self.version.as_deref());
    buffer.write_string(self.module_type.as_str());
  }

  pub fn deserialize(buffer: &mut ReadBuffer) -> TheResult<ModuleSnapData> {
    let path = buffer.read_string()?;
    let name = buffer.read_string()?;
    let version = buffer.read_option_string()?;
    let type_string = buffer.read_string()?;
    let module_type = ModuleType::from_str(&type_string);
    if module_type == ModuleType::Invalid {
      return Err(TheErr::CorruptSnapshot(format!(
        "module {path:?} has unknown type {type_string:?}"
      )));
    }
    Ok(ModuleSnapData {
      path,
      name,
      version,
      module_type,
    })
  }
}

/// One context's snapshot record.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ContextSnapData {
  pub name: String,
  pub namespace: String,
  pub entry_point: String,
  pub modules: Vec<ModuleSnapData>,
}

impl ContextSnapData {
  pub fn serialize(&self, buffer: &mut WriteBuffer) {
    buffer.write_string(&self.name);
    buffer.write_string(&self.namespace);
    buffer.write_string(&self.entry_point);
    buffer.write_u64(self.modules.len() as u64);
    for module in &self.modules {
      module.serialize(buffer);
    }
  }

  pub fn deserialize(buffer: &mut ReadBuffer) -> TheResult<ContextSnapData> {
    let name = buffer.read_string()?;
    let namespace = buffer.read_string()?;
    let entry_point = buffer.read_string()?;
    let count = buffer.read_u64()? as usize;
    let mut modules = Vec::with_capacity(count.min(1024));
    for _ in 0..count {
      modules.push(ModuleSnapData::deserialize(buffer)?);
    }
    Ok(ContextSnapData {
      name,
      namespace,
      entry_point,
      modules,
    })
  }
}

/// One function template descriptor.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FuncTplSnapData {
  pub data_index: u64,
  pub class_name: String,
  pub function_name: String,
  pub namespace: String,
}

impl FuncTplSnapData {
  pub fn serialize(&self, buffer: &mut WriteBuffer) {
    buffer.write_u64(self.data_index);
    buffer.write_string(&self.class_name);
    buffer.write_string(&self.function_name);
    buffer.write_string(&self.namespace);
  }

  pub fn deserialize(buffer: &mut ReadBuffer) -> TheResult<FuncTplSnapData> {
    Ok(FuncTplSnapData {
      data_index: buffer.read_u64()?,
      class_name: buffer.read_string()?,
      function_name: buffer.read_string()?,
      namespace: buffer.read_string()?,
    })
  }
}

/// One runtime's snapshot record. The runtime's own VM start-up blob is the
/// trailing field.
#[derive(Debug, Clone, Default)]
pub struct RuntimeSnapData {
  pub name: String,
  pub idle_enabled: bool,
  pub context_indexes: NamedIndexes,
  pub contexts: Vec<ContextSnapData>,
  pub function_templates: Vec<FuncTplSnapData>,
  pub startup_data: Vec<u8>,
}

impl RuntimeSnapData {
  pub fn serialize(&self, buffer: &mut WriteBuffer) {
    buffer.write_string(&self.name);
    buffer.write_bool(self.idle_enabled);
    self.context_indexes.serialize(buffer);
    buffer.write_u64(self.contexts.len() as u64);
    for context in &self.contexts {
      context.serialize(buffer);
    }
    buffer.write_u64(self.function_templates.len() as u64);
    for tpl in &self.function_templates {
      tpl.serialize(buffer);
    }
    buffer.write_blob(&self.startup_data);
  }

  pub fn deserialize(buffer: &mut ReadBuffer) -> TheResult<RuntimeSnapData> {
    let name = buffer.read_string()?;
    let idle_enabled = buffer.read_bool()?;
    let context_indexes = NamedIndexes::deserialize(buffer)?;
    let context_count = buffer.read_u64()? as usize;
    let mut contexts = Vec::with_capacity(context_count.min(1024));
    for _ in 0..context_count {
      contexts.push(ContextSnapData::deserialize(buffer)?);
    }
    let tpl_count = buffer.read_u64()? as usize;
    let mut function_templates = Vec::with_capacity(tpl_count.min(1024));
    for _ in 0..tpl_count {
      function_templates.push(FuncTplSnapData::deserialize(buffer)?);
    }
    let startup_data = buffer.read_blob()?;
    Ok(RuntimeSnapData {
      name,
      idle_enabled,
      context_indexes,
      contexts,
      function_templates,
      startup_data,
    })
  }
}

/// The whole app's snapshot record.
#[derive(Debug, Clone, Default)]
pub struct AppSnapData {
  pub name: String,
  pub version: String,
  pub runtime_indexes: NamedIndexes,
  pub runtimes: Vec<RuntimeSnapData>,
}

impl AppSnapData {
  pub fn serialize(&self, buffer: &mut WriteBuffer) {
    buffer.write_string(&self.name);
    buffer.write_string(&self.version);
    self.runtime_indexes.serialize(buffer);
    buffer.write_u64(self.runtimes.len() as u64);
    for runtime in &self.runtimes {
      runtime.serialize(buffer);
    }
  }

  pub fn deserialize(buffer: &mut ReadBuffer) -> TheResult<AppSnapData> {
    let name = buffer.read_string()?;
    let version = buffer.read_string()?;
    let runtime_indexes = NamedIndexes::deserialize(buffer)?;
    let runtime_count = buffer.read_u64()? as usize;
    if runtime_count != runtime_indexes.count() {
      return Err(TheErr::CorruptSnapshot(format!(
        "runtime count {runtime_count} does not match the index table ({})",
        runtime_indexes.count()
      )));
    }
    let mut runtimes = Vec::with_capacity(runtime_count.min(256));
    for _ in 0..runtime_count {
      runtimes.push(RuntimeSnapData::deserialize(buffer)?);
    }
    Ok(AppSnapData {
      name,
      version,
      runtime_indexes,
      runtimes,
    })
  }
}
