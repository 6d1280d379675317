//! Per-chunk environments and module freezing.
//!
//! Every script, interface and module runs against its own `_ENV` table on
//! the shared interpreter. The environment's metatable turns unknown global
//! reads and every global write outside the load phase into isolation
//! errors. Module tables are frozen after loading so scripts sharing a
//! module cannot communicate through it.

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use mlua::{Function, Lua, Result as LuaResult, Table, Value, Variadic};

use super::config::StandardModule;
use super::types::describe_key;

/// Execution phase of a chunk, used to gate global access.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Phase {
    Load,
    Init,
    Interface,
    Run,
    /// Between phases; module code runs here when called from a script.
    Idle,
}

impl Phase {
    fn label(self) -> &'static str {
        match self {
            Phase::Load => "the main chunk",
            Phase::Init => "init()",
            Phase::Interface => "interface()",
            Phase::Run => "run()",
            Phase::Idle => "module code",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ChunkKind {
    Script,
    Interface,
    Module,
}

impl ChunkKind {
    /// Globals the main chunk may define.
    fn entry_points(self) -> &'static [&'static str] {
        match self {
            ChunkKind::Script => &["interface", "run", "init"],
            ChunkKind::Interface => &["interface"],
            ChunkKind::Module => &[],
        }
    }
}

/// Isolation breaches. Raised from inside Lua and recovered on the way out
/// so they can be reported apart from ordinary runtime errors.
#[derive(Debug, Clone, thiserror::Error)]
pub(crate) enum Violation {
    #[error("Unexpected global access to key '{key}' in {phase}!")]
    GlobalAccess { key: String, phase: &'static str },
    #[error(
        "Unexpected global variable definition '{key}' in {phase}! \
         Use the GLOBAL table to store global data, or use modules"
    )]
    GlobalDefinition { key: String, phase: &'static str },
    #[error("Modifying module data is not allowed! (key '{0}')")]
    ModuleMutation(String),
}

#[derive(Debug, Clone, thiserror::Error)]
#[error("instruction limit of {0} exceeded")]
pub(crate) struct InstructionLimitExceeded(pub u64);

fn violation(violation: Violation) -> mlua::Error {
    mlua::Error::external(violation)
}

/// Unwraps callback layers down to the root cause. Returns whether it was
/// an isolation violation, and its message.
pub(crate) fn classify(err: &mlua::Error) -> (bool, String) {
    match err {
        mlua::Error::CallbackError { cause, .. } => classify(cause),
        mlua::Error::ExternalError(inner) => {
            (inner.downcast_ref::<Violation>().is_some(), inner.to_string())
        }
        mlua::Error::RuntimeError(message) => (false, message.clone()),
        mlua::Error::SyntaxError { message, .. } => (false, message.clone()),
        other => (false, other.to_string()),
    }
}

const BASE_FUNCTIONS: [&str; 15] = [
    "_VERSION",
    "assert",
    "error",
    "ipairs",
    "next",
    "pairs",
    "pcall",
    "rawequal",
    "rawlen",
    "select",
    "setmetatable",
    "tonumber",
    "tostring",
    "type",
    "xpcall",
];

/// Inputs to [`build_environment`].
pub(crate) struct EnvironmentSpec<'a, 'lua> {
    pub name: &'a str,
    pub kind: ChunkKind,
    pub phase: Rc<Cell<Phase>>,
    pub standard_modules: &'a [StandardModule],
    pub modules: &'a [(String, Table<'lua>)],
    pub type_table: Option<Table<'lua>>,
}

/// Builds a fresh `_ENV`. Returns the table and the list that `modules(...)`
/// calls in the main chunk append to.
pub(crate) fn build_environment<'lua>(
    lua: &'lua Lua,
    spec: EnvironmentSpec<'_, 'lua>,
) -> LuaResult<(Table<'lua>, Rc<RefCell<Vec<String>>>)> {
    let env = lua.create_table()?;
    let globals = lua.globals();

    for module in spec.standard_modules {
        match module.table_name() {
            None => {
                for name in BASE_FUNCTIONS {
                    env.raw_set(name, globals.raw_get::<_, Value>(name)?)?;
                }
                env.raw_set("getmetatable", create_getmetatable(lua)?)?;
                env.raw_set("print", create_print(lua, spec.name.to_string())?)?;
            }
            Some(table_name) => {
                let source: Table = globals.raw_get(table_name)?;
                let copy = lua.create_table()?;
                for pair in source.pairs::<Value, Value>() {
                    let (key, value) = pair?;
                    copy.raw_set(key, value)?;
                }
                env.raw_set(table_name, copy)?;
            }
        }
    }

    if spec.kind != ChunkKind::Module {
        env.raw_set("GLOBAL", lua.create_table()?)?;
    }
    if let Some(types) = spec.type_table {
        env.raw_set("Type", types)?;
    }
    for (alias, exports) in spec.modules {
        if !matches!(env.raw_get::<_, Value>(alias.as_str())?, Value::Nil) {
            return Err(mlua::Error::RuntimeError(format!(
                "Module alias '{alias}' collides with a predefined global"
            )));
        }
        env.raw_set(alias.as_str(), exports.clone())?;
    }

    let declared = Rc::new(RefCell::new(Vec::new()));
    let sink = Rc::clone(&declared);
    env.raw_set(
        "modules",
        lua.create_function(move |_, names: Variadic<String>| {
            sink.borrow_mut().extend(names);
            Ok(())
        })?,
    )?;

    let meta = lua.create_table()?;
    let read_phase = Rc::clone(&spec.phase);
    meta.raw_set(
        "__index",
        lua.create_function(move |_, (_env, key): (Value, Value)| {
            Err::<(), _>(violation(Violation::GlobalAccess {
                key: describe_key(&key),
                phase: read_phase.get().label(),
            }))
        })?,
    )?;
    let write_phase = Rc::clone(&spec.phase);
    let kind = spec.kind;
    meta.raw_set(
        "__newindex",
        lua.create_function(move |_, (env, key, value): (Table, Value, Value)| {
            let phase = write_phase.get();
            let allowed = phase == Phase::Load
                && matches!(value, Value::Function(_))
                && matches!(&key, Value::String(name)
                    if kind.entry_points().iter().any(|entry| name.as_bytes() == entry.as_bytes()));
            if allowed {
                env.raw_set(key, value)
            } else {
                Err(violation(Violation::GlobalDefinition {
                    key: describe_key(&key),
                    phase: phase.label(),
                }))
            }
        })?,
    )?;
    meta.raw_set("__metatable", "protected environment")?;
    env.set_metatable(Some(meta));

    Ok((env, declared))
}

/// `getmetatable` without access to the string metatable, which every
/// chunk on the interpreter shares.
fn create_getmetatable(lua: &Lua) -> LuaResult<Function<'_>> {
    lua.create_function(|lua, value: Value| match value {
        Value::String(_) => Ok(Value::Nil),
        other => {
            let getmetatable: Function = lua.globals().raw_get("getmetatable")?;
            getmetatable.call::<_, Value>(other)
        }
    })
}

fn create_print(lua: &Lua, name: String) -> LuaResult<Function<'_>> {
    lua.create_function(move |lua, values: Variadic<Value>| {
        let mut out = Vec::new();
        for value in values.iter() {
            let text = match value {
                Value::Nil => "nil".to_string(),
                Value::Boolean(b) => b.to_string(),
                Value::String(s) => s.to_str()?.to_string(),
                _ => match lua.coerce_string(value.clone())? {
                    Some(s) => s.to_str()?.to_string(),
                    None => format!("<{}>", value.type_name()),
                },
            };
            out.push(text);
        }
        log::info!("[{name}] {}", out.join("\t"));
        Ok(())
    })
}

const FROZEN_MARKER: &str = "protected module data";

// `backing` never leaves these closures; nested tables are frozen in place,
// so values handed out by `__pairs` are proxies too.
const FROZEN_META_FACTORY: &str = r#"
local next = next
return function(backing, deny, marker)
    local function step(_, key)
        return next(backing, key)
    end
    return {
        __index = backing,
        __newindex = deny,
        __len = function() return #backing end,
        __pairs = function(proxy) return step, proxy, nil end,
        __metatable = marker,
    }
end
"#;

/// The hidden table behind a frozen module table, if `table` is one.
fn frozen_backing<'lua>(table: &Table<'lua>) -> LuaResult<Option<Table<'lua>>> {
    let Some(meta) = table.get_metatable() else {
        return Ok(None);
    };
    let frozen = matches!(meta.raw_get::<_, Value>("__metatable")?,
        Value::String(marker) if marker.as_bytes() == FROZEN_MARKER.as_bytes());
    if !frozen {
        return Ok(None);
    }
    match meta.raw_get::<_, Value>("__index")? {
        Value::Table(backing) => Ok(Some(backing)),
        _ => Ok(None),
    }
}

/// Key/value pairs of a Lua table. Frozen module tables are read through
/// their backing table, so module data can feed declarations and outputs.
pub(crate) fn table_entries<'lua>(table: &Table<'lua>) -> LuaResult<Vec<(Value<'lua>, Value<'lua>)>> {
    let source = frozen_backing(table)?.unwrap_or_else(|| table.clone());
    source.pairs::<Value, Value>().collect()
}

/// Helpers shared by every freeze. `frozen` is a weak-keyed set of tables
/// already frozen, so shared sub-tables are only processed once.
pub(crate) struct Freezer<'lua> {
    factory: Function<'lua>,
    deny: Function<'lua>,
    frozen: Table<'lua>,
}

impl<'lua> Freezer<'lua> {
    pub(crate) fn create(lua: &'lua Lua) -> LuaResult<Self> {
        let factory: Function = lua
            .load(FROZEN_META_FACTORY)
            .set_name("module_freezer")
            .eval()?;
        let deny = lua.create_function(|_, (_table, key, _value): (Value, Value, Value)| {
            Err::<(), _>(violation(Violation::ModuleMutation(describe_key(&key))))
        })?;
        let frozen = lua.create_table()?;
        let weak = lua.create_table()?;
        weak.raw_set("__mode", "k")?;
        frozen.set_metatable(Some(weak));
        Ok(Self {
            factory,
            deny,
            frozen,
        })
    }

    pub(crate) fn from_parts(
        factory: Function<'lua>,
        deny: Function<'lua>,
        frozen: Table<'lua>,
    ) -> Self {
        Self {
            factory,
            deny,
            frozen,
        }
    }

    pub(crate) fn into_parts(self) -> (Function<'lua>, Function<'lua>, Table<'lua>) {
        (self.factory, self.deny, self.frozen)
    }

    /// Moves the contents of `table` (recursively) into hidden backing
    /// tables and installs the protected metatable in place, so existing
    /// references see the frozen version.
    pub(crate) fn freeze(&self, lua: &'lua Lua, table: Table<'lua>) -> LuaResult<()> {
        if self.frozen.raw_get::<_, Option<bool>>(table.clone())?.is_some() {
            return Ok(());
        }
        self.frozen.raw_set(table.clone(), true)?;

        let entries: Vec<(Value, Value)> = table
            .clone()
            .pairs::<Value, Value>()
            .collect::<LuaResult<_>>()?;
        let backing = lua.create_table()?;
        for (key, value) in entries {
            if let Value::Table(inner) = &value {
                self.freeze(lua, inner.clone())?;
            }
            backing.raw_set(key.clone(), value)?;
            table.raw_set(key, Value::Nil)?;
        }
        if let Some(existing) = table.get_metatable() {
            backing.set_metatable(Some(existing));
        }
        let meta: Table = self
            .factory
            .call((backing, self.deny.clone(), FROZEN_MARKER))?;
        table.set_metatable(Some(meta));
        Ok(())
    }
}
