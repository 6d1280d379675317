use std::cell::{Cell, RefCell};
use std::rc::Rc;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

use mlua::{
    Function, HookTriggers, Lua, LuaOptions, RegistryKey, Result as LuaResult, StdLib, Table,
    Value,
};

use crate::property::Property;

use super::access::PropertyView;
use super::config::LuaConfig;
use super::sandbox::{
    build_environment, classify, ChunkKind, EnvironmentSpec, Freezer, InstructionLimitExceeded,
    Phase,
};
use super::types::{create_type_table, InterfaceDecl, Shape};
use super::ScriptError;

const HOOK_INTERVAL: u64 = 1000;

/// A loaded script or interface: its environment and entry points.
pub struct CompiledScript {
    name: String,
    kind: ChunkKind,
    env: RegistryKey,
    interface: RegistryKey,
    run: Option<RegistryKey>,
    phase: Rc<Cell<Phase>>,
}

impl CompiledScript {
    pub fn name(&self) -> &str {
        &self.name
    }
}

/// A loaded module: its frozen export table.
pub struct CompiledModule {
    name: String,
    exports: RegistryKey,
}

impl CompiledModule {
    pub fn name(&self) -> &str {
        &self.name
    }
}

/// The single interpreter shared by every node of an engine. Graph code
/// only sees compiled handles and property trees.
pub struct LuaRuntime {
    lua: Lua,
    type_table: RegistryKey,
    freeze_factory: RegistryKey,
    freeze_deny: RegistryKey,
    frozen: RegistryKey,
    instruction_limit: Option<u64>,
    budget: Arc<AtomicI64>,
}

impl LuaRuntime {
    pub fn new(instruction_limit: Option<u64>) -> LuaResult<Self> {
        let lua = Lua::new_with(
            StdLib::STRING | StdLib::TABLE | StdLib::MATH,
            LuaOptions::default(),
        )?;

        let initial = instruction_limit.map_or(0, |limit| i64::try_from(limit).unwrap_or(i64::MAX));
        let budget = Arc::new(AtomicI64::new(initial));
        if let Some(limit) = instruction_limit {
            let interval = limit.clamp(1, HOOK_INTERVAL);
            let hook_budget = Arc::clone(&budget);
            lua.set_hook(
                HookTriggers {
                    every_nth_instruction: Some(interval as u32),
                    ..Default::default()
                },
                move |_, _| {
                    let left = hook_budget.fetch_sub(interval as i64, Ordering::Relaxed);
                    if left - (interval as i64) < 0 {
                        Err(mlua::Error::external(InstructionLimitExceeded(limit)))
                    } else {
                        Ok(())
                    }
                },
            );
        }

        let freezer = Freezer::create(&lua)?;
        let types = create_type_table(&lua)?;
        freezer.freeze(&lua, types.clone())?;
        let (factory, deny, frozen) = freezer.into_parts();

        Ok(Self {
            type_table: lua.create_registry_value(types)?,
            freeze_factory: lua.create_registry_value(factory)?,
            freeze_deny: lua.create_registry_value(deny)?,
            frozen: lua.create_registry_value(frozen)?,
            instruction_limit,
            budget,
            lua,
        })
    }

    pub fn instruction_limit(&self) -> Option<u64> {
        self.instruction_limit
    }

    fn reset_budget(&self) {
        if let Some(limit) = self.instruction_limit {
            let limit = i64::try_from(limit).unwrap_or(i64::MAX);
            self.budget.store(limit, Ordering::Relaxed);
        }
    }

    fn freezer(&self) -> LuaResult<Freezer<'_>> {
        Ok(Freezer::from_parts(
            self.lua.registry_value(&self.freeze_factory)?,
            self.lua.registry_value(&self.freeze_deny)?,
            self.lua.registry_value(&self.frozen)?,
        ))
    }

    fn module_tables(&self, modules: &[(String, &CompiledModule)]) -> LuaResult<Vec<(String, Table<'_>)>> {
        modules
            .iter()
            .map(|(alias, module)| Ok((alias.clone(), self.lua.registry_value(&module.exports)?)))
            .collect()
    }

    /// Loads a script or interface chunk, checks its entry points and module
    /// declarations, and runs `init()` when present.
    pub(crate) fn compile_script(
        &self,
        name: &str,
        source: &str,
        kind: ChunkKind,
        config: &LuaConfig,
        modules: &[(String, &CompiledModule)],
    ) -> Result<CompiledScript, ScriptError> {
        let fail = |err: mlua::Error| compile_failure(name, &err);
        let phase = Rc::new(Cell::new(Phase::Load));
        let exports = self.module_tables(modules).map_err(fail)?;
        let (env, declared) = build_environment(
            &self.lua,
            EnvironmentSpec {
                name,
                kind,
                phase: Rc::clone(&phase),
                standard_modules: config.standard_modules(),
                modules: &exports,
                type_table: None,
            },
        )
        .map_err(fail)?;

        self.reset_budget();
        self.lua
            .load(source)
            .set_name(name)
            .set_environment(env.clone())
            .exec()
            .map_err(fail)?;
        phase.set(Phase::Idle);
        env.raw_set("modules", Value::Nil).map_err(fail)?;
        check_declared_modules(name, &declared.borrow(), modules)?;

        let interface: Option<Function> = env.raw_get("interface").map_err(fail)?;
        let interface = interface.ok_or_else(|| {
            ScriptError::compile(name, "The interface() function must be defined")
        })?;
        let run: Option<Function> = env.raw_get("run").map_err(fail)?;
        if kind == ChunkKind::Script && run.is_none() {
            return Err(ScriptError::compile(name, "The run() function must be defined"));
        }

        let init: Option<Function> = env.raw_get("init").map_err(fail)?;
        if let Some(init) = init {
            phase.set(Phase::Init);
            self.reset_budget();
            let result = init.call::<_, ()>(());
            phase.set(Phase::Idle);
            result.map_err(fail)?;
        }

        log::debug!("compiled {kind:?} '{name}'");
        Ok(CompiledScript {
            name: name.to_string(),
            kind,
            env: self.lua.create_registry_value(env).map_err(fail)?,
            interface: self.lua.create_registry_value(interface).map_err(fail)?,
            run: run
                .map(|run| self.lua.create_registry_value(run))
                .transpose()
                .map_err(fail)?,
            phase,
        })
    }

    /// Loads a module chunk, which must return a table, and freezes it.
    pub(crate) fn compile_module(
        &self,
        name: &str,
        source: &str,
        config: &LuaConfig,
        modules: &[(String, &CompiledModule)],
    ) -> Result<CompiledModule, ScriptError> {
        let fail = |err: mlua::Error| compile_failure(name, &err);
        let phase = Rc::new(Cell::new(Phase::Load));
        let exports = self.module_tables(modules).map_err(fail)?;
        let types: Table = self.lua.registry_value(&self.type_table).map_err(fail)?;
        let (env, declared) = build_environment(
            &self.lua,
            EnvironmentSpec {
                name,
                kind: ChunkKind::Module,
                phase: Rc::clone(&phase),
                standard_modules: config.standard_modules(),
                modules: &exports,
                type_table: Some(types),
            },
        )
        .map_err(fail)?;

        self.reset_budget();
        let result: Value = self
            .lua
            .load(source)
            .set_name(name)
            .set_environment(env.clone())
            .eval()
            .map_err(fail)?;
        phase.set(Phase::Idle);
        env.raw_set("modules", Value::Nil).map_err(fail)?;
        check_declared_modules(name, &declared.borrow(), modules)?;

        let type_name = result.type_name();
        let Value::Table(table) = result else {
            return Err(ScriptError::compile(
                name,
                format!("Module must return a table, got {type_name}"),
            ));
        };
        self.freezer()
            .and_then(|freezer| freezer.freeze(&self.lua, table.clone()))
            .map_err(fail)?;

        log::debug!("compiled module '{name}'");
        Ok(CompiledModule {
            name: name.to_string(),
            exports: self.lua.create_registry_value(table).map_err(fail)?,
        })
    }

    /// Runs `interface()` and returns the declared input and output trees.
    /// Interfaces declare a single tree, returned twice.
    pub(crate) fn declare_interface(
        &self,
        script: &CompiledScript,
    ) -> Result<(Property, Property), ScriptError> {
        let name = script.name.as_str();
        let fail = |err: mlua::Error| compile_failure(name, &err);
        let env: Table = self.lua.registry_value(&script.env).map_err(fail)?;
        let interface: Function = self.lua.registry_value(&script.interface).map_err(fail)?;
        let types: Table = self.lua.registry_value(&self.type_table).map_err(fail)?;

        env.raw_set("Type", types).map_err(fail)?;
        script.phase.set(Phase::Interface);
        self.reset_budget();
        let declared = match script.kind {
            ChunkKind::Interface => {
                let (decl, fields) = InterfaceDecl::new("INOUT");
                interface.call::<_, ()>(decl).map(|()| (Rc::clone(&fields), fields))
            }
            _ => {
                let (inputs, in_fields) = InterfaceDecl::new("IN");
                let (outputs, out_fields) = InterfaceDecl::new("OUT");
                interface
                    .call::<_, ()>((inputs, outputs))
                    .map(|()| (in_fields, out_fields))
            }
        };
        script.phase.set(Phase::Idle);
        env.raw_set("Type", Value::Nil).map_err(fail)?;
        let (in_fields, out_fields) = declared.map_err(fail)?;

        let build = |label: &str, fields: &Rc<RefCell<Vec<(String, Shape)>>>| {
            Property::new_struct(
                label,
                fields
                    .borrow()
                    .iter()
                    .map(|(field, shape)| shape.to_property(field))
                    .collect(),
            )
        };
        Ok((build("IN", &in_fields), build("OUT", &out_fields)))
    }

    /// Runs `run(IN, OUT)` and returns the updated output tree. On error the
    /// caller's outputs are untouched.
    pub(crate) fn run(
        &self,
        script: &CompiledScript,
        inputs: &Property,
        outputs: &Property,
    ) -> Result<Property, ScriptError> {
        let name = script.name.as_str();
        let fail = |err: mlua::Error| runtime_failure(name, &err);
        let Some(run) = &script.run else {
            return Ok(outputs.clone());
        };
        let run: Function = self.lua.registry_value(run).map_err(fail)?;

        let in_tree = Rc::new(RefCell::new(inputs.clone()));
        let out_tree = Rc::new(RefCell::new(outputs.clone()));
        let in_view = PropertyView::root(in_tree, false);
        let out_view = PropertyView::root(Rc::clone(&out_tree), true);

        script.phase.set(Phase::Run);
        self.reset_budget();
        let result = run.call::<_, ()>((in_view, out_view));
        script.phase.set(Phase::Idle);
        result.map_err(fail)?;

        let updated = out_tree.borrow().clone();
        Ok(updated)
    }

    /// Drops registry slots released by destroyed nodes.
    pub(crate) fn collect_garbage(&self) {
        self.lua.expire_registry_values();
    }
}

fn compile_failure(name: &str, err: &mlua::Error) -> ScriptError {
    match classify(err) {
        (true, message) => ScriptError::Isolation {
            name: name.to_string(),
            message,
        },
        (false, message) => ScriptError::compile(name, message),
    }
}

fn runtime_failure(name: &str, err: &mlua::Error) -> ScriptError {
    match classify(err) {
        (true, message) => ScriptError::Isolation {
            name: name.to_string(),
            message,
        },
        (false, message) => ScriptError::Runtime {
            name: name.to_string(),
            message,
        },
    }
}

/// The `modules(...)` declaration must name exactly the configured aliases.
fn check_declared_modules(
    name: &str,
    declared: &[String],
    provided: &[(String, &CompiledModule)],
) -> Result<(), ScriptError> {
    let mut seen: Vec<&str> = Vec::with_capacity(declared.len());
    for alias in declared {
        if seen.contains(&alias.as_str()) {
            return Err(ScriptError::compile(
                name,
                format!("Module dependencies must be unique, '{alias}' is declared twice"),
            ));
        }
        seen.push(alias);
    }
    let mut expected: Vec<&str> = provided.iter().map(|(alias, _)| alias.as_str()).collect();
    seen.sort_unstable();
    expected.sort_unstable();
    if seen != expected {
        return Err(ScriptError::compile(
            name,
            format!(
                "Module dependencies declared in source code ({}) do not match those provided by LuaConfig ({})",
                seen.join(", "),
                expected.join(", ")
            ),
        ));
    }
    Ok(())
}
