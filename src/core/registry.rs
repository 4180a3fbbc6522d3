use crate::core::demultiplexer::Demultiplexer;
use crate::core::error::StageError;
use crate::core::multiplexer::Multiplexer;
use crate::core::stage::{Consumer, ModuleInfo, ParameterMap, Processor, Producer, Stage, StageRole};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, OnceLock};

pub type SharedProducer = Arc<Mutex<Box<dyn Producer>>>;
pub type SharedProcessor = Arc<Mutex<Box<dyn Processor>>>;
pub type SharedConsumer = Arc<Mutex<Box<dyn Consumer>>>;

/// A role-typed reference to a registered stage. The fan-in/fan-out
/// variants carry the concrete engine types so the assembler can reach
/// their wiring operations after duplicating them from the registry.
#[derive(Clone)]
pub enum ModuleHandle {
    Producer(SharedProducer),
    Processor(SharedProcessor),
    Consumer(SharedConsumer),
    FanIn(Arc<Mutex<Multiplexer>>),
    FanOut(Arc<Mutex<Demultiplexer>>),
}

impl std::fmt::Debug for ModuleHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let variant = match self {
            ModuleHandle::Producer(_) => "Producer",
            ModuleHandle::Processor(_) => "Processor",
            ModuleHandle::Consumer(_) => "Consumer",
            ModuleHandle::FanIn(_) => "FanIn",
            ModuleHandle::FanOut(_) => "FanOut",
        };
        write!(f, "ModuleHandle::{variant}")
    }
}

macro_rules! with_stage {
    ($handle:expr, $stage:ident => $body:expr) => {
        match $handle {
            ModuleHandle::Producer(cell) => {
                #[allow(unused_mut)]
                let mut $stage = cell.lock().expect("poisoned module lock");
                $body
            }
            ModuleHandle::Processor(cell) => {
                #[allow(unused_mut)]
                let mut $stage = cell.lock().expect("poisoned module lock");
                $body
            }
            ModuleHandle::Consumer(cell) => {
                #[allow(unused_mut)]
                let mut $stage = cell.lock().expect("poisoned module lock");
                $body
            }
            ModuleHandle::FanIn(cell) => {
                #[allow(unused_mut)]
                let mut $stage = cell.lock().expect("poisoned module lock");
                $body
            }
            ModuleHandle::FanOut(cell) => {
                #[allow(unused_mut)]
                let mut $stage = cell.lock().expect("poisoned module lock");
                $body
            }
        }
    };
}

impl ModuleHandle {
    pub fn producer(stage: Box<dyn Producer>) -> Self {
        ModuleHandle::Producer(Arc::new(Mutex::new(stage)))
    }

    pub fn processor(stage: Box<dyn Processor>) -> Self {
        ModuleHandle::Processor(Arc::new(Mutex::new(stage)))
    }

    pub fn consumer(stage: Box<dyn Consumer>) -> Self {
        ModuleHandle::Consumer(Arc::new(Mutex::new(stage)))
    }

    pub fn info(&self) -> ModuleInfo {
        with_stage!(self, stage => stage.info().clone())
    }

    pub fn role(&self) -> StageRole {
        self.info().role
    }

    pub fn parameters(&self) -> ParameterMap {
        with_stage!(self, stage => stage.parameters())
    }

    pub fn configure(&self, params: &ParameterMap) -> Result<(), StageError> {
        with_stage!(self, stage => stage.configure(params))
    }

    pub fn is_ready(&self) -> bool {
        with_stage!(self, stage => stage.is_ready())
    }

    /// Clone this module under a fresh specific id. The clone is not
    /// registered; [`duplicate`] is the public minting path.
    fn duplicate_unregistered(&self, specific_id: &str) -> ModuleHandle {
        match self {
            ModuleHandle::Producer(cell) => {
                let stage = cell.lock().expect("poisoned module lock");
                ModuleHandle::producer(stage.duplicate(specific_id))
            }
            ModuleHandle::Processor(cell) => {
                let stage = cell.lock().expect("poisoned module lock");
                ModuleHandle::processor(stage.duplicate(specific_id))
            }
            ModuleHandle::Consumer(cell) => {
                let stage = cell.lock().expect("poisoned module lock");
                ModuleHandle::consumer(stage.duplicate(specific_id))
            }
            ModuleHandle::FanIn(cell) => {
                let stage = cell.lock().expect("poisoned module lock");
                ModuleHandle::FanIn(Arc::new(Mutex::new(stage.duplicate(specific_id))))
            }
            ModuleHandle::FanOut(cell) => {
                let stage = cell.lock().expect("poisoned module lock");
                ModuleHandle::FanOut(Arc::new(Mutex::new(stage.duplicate(specific_id))))
            }
        }
    }
}

#[derive(Default)]
struct Registry {
    templates: HashMap<String, ModuleHandle>,
    instances: HashMap<(String, String), ModuleHandle>,
}

fn registry() -> &'static Mutex<Registry> {
    static REGISTRY: OnceLock<Mutex<Registry>> = OnceLock::new();
    REGISTRY.get_or_init(|| Mutex::new(Registry::default()))
}

/// Register a default template for a stage kind. Called once per kind
/// at process initialisation; re-registering a generic id fails.
pub fn register_template(handle: ModuleHandle) -> Result<(), StageError> {
    let info = handle.info();
    let mut registry = registry().lock().expect("poisoned registry lock");

    if registry.templates.contains_key(&info.generic_id) {
        return Err(StageError::Duplicate {
            generic_id: info.generic_id,
            specific_id: info.specific_id,
        });
    }

    registry.templates.insert(info.generic_id, handle);
    Ok(())
}

/// Mint a usable instance by duplicating the template for the given
/// generic id under a fresh specific id. The only way to obtain a
/// registered, uniquely-named instance.
pub fn duplicate(generic_id: &str, specific_id: &str) -> Result<ModuleHandle, StageError> {
    let mut registry = registry().lock().expect("poisoned registry lock");

    let template = registry
        .templates
        .get(generic_id)
        .ok_or_else(|| StageError::UnknownModule {
            generic_id: generic_id.to_string(),
        })?;

    let key = (generic_id.to_string(), specific_id.to_string());
    if registry.instances.contains_key(&key) {
        return Err(StageError::Duplicate {
            generic_id: generic_id.to_string(),
            specific_id: specific_id.to_string(),
        });
    }

    let instance = template.duplicate_unregistered(specific_id);
    registry.instances.insert(key, instance.clone());

    Ok(instance)
}

pub fn lookup_template(generic_id: &str) -> Option<ModuleHandle> {
    let registry = registry().lock().expect("poisoned registry lock");
    registry.templates.get(generic_id).cloned()
}

pub fn lookup_instance(generic_id: &str, specific_id: &str) -> Option<ModuleHandle> {
    let registry = registry().lock().expect("poisoned registry lock");
    registry
        .instances
        .get(&(generic_id.to_string(), specific_id.to_string()))
        .cloned()
}

/// Templates registered for the given role, sorted by generic id for
/// stable listings.
pub fn list_by_role(role: StageRole) -> Vec<ModuleInfo> {
    let registry = registry().lock().expect("poisoned registry lock");
    let mut listed: Vec<ModuleInfo> = registry
        .templates
        .values()
        .map(ModuleHandle::info)
        .filter(|info| info.role == role)
        .collect();
    listed.sort_by(|a, b| a.generic_id.cmp(&b.generic_id));
    listed
}

#[cfg(test)]
mod tests {
    use super::*;

    // The registry is process-wide, so tests use ids no other test or
    // built-in module claims.

    #[test]
    fn duplicate_mints_registered_instances() {
        register_template(ModuleHandle::FanIn(Arc::new(Mutex::new(Multiplexer::new(
            "",
        )))))
        .ok();

        let instance = duplicate(Multiplexer::GENERIC_ID, "registry-test-a").unwrap();
        assert_eq!(instance.info().specific_id, "registry-test-a");
        assert!(lookup_instance(Multiplexer::GENERIC_ID, "registry-test-a").is_some());
    }

    #[test]
    fn duplicate_specific_id_collides() {
        register_template(ModuleHandle::FanIn(Arc::new(Mutex::new(Multiplexer::new(
            "",
        )))))
        .ok();

        duplicate(Multiplexer::GENERIC_ID, "registry-test-b").unwrap();
        let err = duplicate(Multiplexer::GENERIC_ID, "registry-test-b").unwrap_err();
        assert!(matches!(err, StageError::Duplicate { .. }));
    }

    #[test]
    fn unknown_generic_id_is_rejected() {
        let err = duplicate("no-such-module", "x").unwrap_err();
        assert!(matches!(err, StageError::UnknownModule { .. }));
    }
}
