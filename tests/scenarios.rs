//! End-to-end behaviour of the logic engine: scheduling, links, modules,
//! animations and persistence.

use std::sync::Arc;

use glam::Vec3;
use once_cell::sync::Lazy;

use crystal_logic::{
    AnimationChannel, DataModel, ErrorKind, GraphError, Interpolation, LogicEngine, LogicError,
    LuaConfig, NodeId, PropertyValue, SceneObject, StandardModule,
};

const INCREMENT: &str = r#"
function interface(IN, OUT)
    IN.value = Type:Int32()
    OUT.value = Type:Int32()
end

function run(IN, OUT)
    OUT.value = IN.value + 1
end
"#;

const COUNTER: &str = r#"
function init()
    GLOBAL.runs = 0
end

function interface(IN, OUT)
    IN.value = Type:Int32()
    OUT.value = Type:Int32()
    OUT.runs = Type:Int32()
end

function run(IN, OUT)
    GLOBAL.runs = GLOBAL.runs + 1
    OUT.value = IN.value
    OUT.runs = GLOBAL.runs
end
"#;

static ROTATION: Lazy<Vec<AnimationChannel>> = Lazy::new(|| {
    vec![AnimationChannel::new(
        "angle",
        vec![0.0, 1.5],
        vec![PropertyValue::Float(0.0), PropertyValue::Float(360.0)],
        Interpolation::Linear,
    )]
});

fn script(engine: &mut LogicEngine, source: &str, name: &str) -> NodeId {
    engine
        .create_lua_script(source, LuaConfig::new(), name)
        .unwrap_or_else(|err| panic!("{name} failed to compile: {err}"))
}

fn link(engine: &mut LogicEngine, from: NodeId, from_path: &str, to: NodeId, to_path: &str) {
    let source = engine.output(from, from_path).expect("source property");
    let target = engine.input(to, to_path).expect("target property");
    engine.link(&source, &target).expect("link");
}

fn output<T: crystal_logic::FromPropertyValue>(engine: &LogicEngine, node: NodeId, path: &str) -> T {
    let handle = engine.output(node, path).expect("output property");
    engine.get_property(&handle).expect("typed output")
}

fn set_input(engine: &mut LogicEngine, node: NodeId, path: &str, value: impl Into<PropertyValue>) {
    let handle = engine.input(node, path).expect("input property");
    engine.set_property(&handle, value).expect("set input");
}

#[test]
fn increment_chain_propagates_in_one_update() {
    let mut engine = LogicEngine::new().unwrap();
    let first = script(&mut engine, INCREMENT, "first");
    let second = script(&mut engine, INCREMENT, "second");
    link(&mut engine, first, "value", second, "value");

    set_input(&mut engine, first, "value", 42);
    assert!(engine.update());
    assert_eq!(output::<i32>(&engine, first, "value"), 43);
    assert_eq!(output::<i32>(&engine, second, "value"), 44);
}

#[test]
fn links_order_execution_regardless_of_creation_order() {
    let mut engine = LogicEngine::new().unwrap();
    let downstream = script(&mut engine, INCREMENT, "downstream");
    let upstream = script(&mut engine, INCREMENT, "upstream");
    link(&mut engine, upstream, "value", downstream, "value");

    set_input(&mut engine, upstream, "value", 1);
    assert!(engine.update());
    assert_eq!(output::<i32>(&engine, downstream, "value"), 3);
}

#[test]
fn second_update_without_changes_executes_nothing() {
    let mut engine = LogicEngine::new().unwrap();
    let counter = script(&mut engine, COUNTER, "counter");
    assert!(engine.update());
    assert_eq!(output::<i32>(&engine, counter, "runs"), 1);
    assert!(!engine.node(counter).unwrap().is_dirty());

    assert!(engine.update());
    assert_eq!(output::<i32>(&engine, counter, "runs"), 1);

    set_input(&mut engine, counter, "value", 5);
    assert!(engine.update());
    assert_eq!(output::<i32>(&engine, counter, "runs"), 2);

    // same value again: nothing to do
    set_input(&mut engine, counter, "value", 5);
    assert!(engine.update());
    assert_eq!(output::<i32>(&engine, counter, "runs"), 2);
}

#[test]
fn unchanged_upstream_output_does_not_rerun_downstream() {
    let mut engine = LogicEngine::new().unwrap();
    let source = script(
        &mut engine,
        r#"
        function interface(IN, OUT)
            IN.value = Type:Int32()
            IN.noise = Type:Int32()
            OUT.value = Type:Int32()
        end
        function run(IN, OUT)
            OUT.value = IN.value
        end
        "#,
        "source",
    );
    let sink = script(&mut engine, COUNTER, "sink");
    link(&mut engine, source, "value", sink, "value");
    assert!(engine.update());
    assert_eq!(output::<i32>(&engine, sink, "runs"), 1);

    // source re-runs but produces the same value
    set_input(&mut engine, source, "noise", 3);
    assert!(engine.update());
    assert_eq!(output::<i32>(&engine, sink, "runs"), 1);

    set_input(&mut engine, source, "value", 9);
    assert!(engine.update());
    assert_eq!(output::<i32>(&engine, sink, "runs"), 2);
    assert_eq!(output::<i32>(&engine, sink, "value"), 9);
}

#[test]
fn weak_links_deliver_previous_update_values() {
    let mut engine = LogicEngine::new().unwrap();
    let a = script(&mut engine, INCREMENT, "a");
    let b = script(&mut engine, INCREMENT, "b");
    let source = engine.output(a, "value").unwrap();
    let target = engine.input(b, "value").unwrap();
    engine.link_weak(&source, &target).unwrap();

    set_input(&mut engine, a, "value", 10);
    assert!(engine.update());
    assert_eq!(output::<i32>(&engine, a, "value"), 11);
    // nothing captured yet, b kept its own input
    assert_eq!(output::<i32>(&engine, b, "value"), 1);

    assert!(engine.update());
    assert_eq!(output::<i32>(&engine, b, "value"), 12);

    set_input(&mut engine, a, "value", 20);
    assert!(engine.update());
    assert_eq!(output::<i32>(&engine, b, "value"), 12);
    assert!(engine.update());
    assert_eq!(output::<i32>(&engine, b, "value"), 22);
}

#[test]
fn weak_links_may_close_feedback_loops() {
    let mut engine = LogicEngine::new().unwrap();
    let a = script(&mut engine, INCREMENT, "a");
    let b = script(&mut engine, INCREMENT, "b");
    link(&mut engine, a, "value", b, "value");
    let back_source = engine.output(b, "value").unwrap();
    let back_target = engine.input(a, "value").unwrap();
    engine.link_weak(&back_source, &back_target).unwrap();

    assert!(engine.update());
    assert_eq!(output::<i32>(&engine, b, "value"), 2);
    assert!(engine.update());
    assert_eq!(output::<i32>(&engine, b, "value"), 4);
    assert!(engine.update());
    assert_eq!(output::<i32>(&engine, b, "value"), 6);
}

#[test]
fn cycles_are_rejected_and_leave_the_graph_unchanged() {
    let mut engine = LogicEngine::new().unwrap();
    let a = script(&mut engine, INCREMENT, "a");
    let b = script(&mut engine, INCREMENT, "b");
    let c = script(&mut engine, INCREMENT, "c");
    link(&mut engine, a, "value", b, "value");
    link(&mut engine, b, "value", c, "value");

    let source = engine.output(c, "value").unwrap();
    let target = engine.input(a, "value").unwrap();
    let err = engine.link(&source, &target).unwrap_err();
    assert!(matches!(err, LogicError::Graph(GraphError::CycleDetected { .. })));
    assert_eq!(engine.links().count(), 2);
    assert!(!engine.is_linked(&target));
    assert_eq!(engine.errors()[0].kind, ErrorKind::Graph);
    assert!(engine.update());
}

#[test]
fn module_constants_reach_scripts_exactly() {
    let mut engine = LogicEngine::new().unwrap();
    let module = engine
        .create_lua_module(
            r#"
            local mymath = {}
            mymath.PI = 3.1415
            function mymath.add(a, b) return a + b end
            return mymath
            "#,
            LuaConfig::new(),
            "mymath",
        )
        .unwrap();
    let user = engine
        .create_lua_script(
            r#"
            modules("m")
            function interface(IN, OUT)
                OUT.pi = Type:Float()
                OUT.tau = Type:Float()
            end
            function run(IN, OUT)
                OUT.pi = m.PI
                OUT.tau = m.add(m.PI, m.PI)
            end
            "#,
            LuaConfig::new().with_module("m", module),
            "user",
        )
        .unwrap();
    assert!(engine.update());
    assert_eq!(output::<f32>(&engine, user, "pi"), 3.1415f32);
    assert_eq!(output::<f32>(&engine, user, "tau"), 6.283f32);
}

#[test]
fn modules_cannot_be_modified_by_scripts() {
    let mut engine = LogicEngine::new().unwrap();
    let module = engine
        .create_lua_module("return { value = 1 }", LuaConfig::new(), "data")
        .unwrap();
    let vandal = engine
        .create_lua_script(
            r#"
            modules("data")
            function interface(IN, OUT) OUT.v = Type:Int32() end
            function run(IN, OUT) data.value = 2 end
            "#,
            LuaConfig::new().with_module("data", module),
            "vandal",
        )
        .unwrap();
    assert!(!engine.update());
    let entry = &engine.errors()[0];
    assert_eq!(entry.node, Some(vandal));
    assert!(entry.message.contains("Modifying module data is not allowed"));
}

#[test]
fn iterating_a_module_never_exposes_writable_data() {
    let mut engine = LogicEngine::new().unwrap();
    let module = engine
        .create_lua_module(
            "return { PI = 3.1415, nested = { x = 1 } }",
            LuaConfig::new(),
            "consts",
        )
        .unwrap();
    let config = LuaConfig::new()
        .with_module("m", module)
        .with_standard_module(StandardModule::Base);
    let vandal = engine
        .create_lua_script(
            r#"
            modules("m")
            function interface(IN, OUT) end
            function run(IN, OUT)
                local _, data = pairs(m)
                data.PI = 3
            end
            "#,
            config.clone(),
            "vandal",
        )
        .unwrap();
    let reader = engine
        .create_lua_script(
            r#"
            modules("m")
            function interface(IN, OUT)
                OUT.pi = Type:Float()
                OUT.count = Type:Int32()
                OUT.nestedFrozen = Type:Bool()
            end
            function run(IN, OUT)
                OUT.pi = m.PI
                local count = 0
                for key, value in pairs(m) do
                    count = count + 1
                    if key == "nested" then
                        OUT.nestedFrozen = not pcall(function() value.x = 2 end)
                    end
                end
                OUT.count = count
            end
            "#,
            config,
            "reader",
        )
        .unwrap();

    assert!(!engine.update());
    assert_eq!(engine.errors().len(), 1);
    assert_eq!(engine.errors()[0].node, Some(vandal));
    assert_eq!(engine.errors()[0].kind, ErrorKind::Isolation);
    assert!(engine.errors()[0].message.contains("Modifying module data is not allowed! (key 'PI')"));
    assert_eq!(output::<f32>(&engine, reader, "pi"), 3.1415f32);
    assert_eq!(output::<i32>(&engine, reader, "count"), 2);
    assert!(output::<bool>(&engine, reader, "nestedFrozen"));
}

#[test]
fn string_methods_cannot_be_redefined_for_other_scripts() {
    let mut engine = LogicEngine::new().unwrap();
    let base = LuaConfig::new().with_standard_module(StandardModule::Base);
    let tamper = engine
        .create_lua_script(
            r#"
            function interface(IN, OUT)
                OUT.hidden = Type:Bool()
                OUT.tables = Type:Bool()
            end
            function run(IN, OUT)
                local meta = getmetatable("")
                if meta then
                    meta.__index.upper = function() return "hacked" end
                end
                OUT.hidden = meta == nil
                OUT.tables = getmetatable(setmetatable({}, { __metatable = "locked" })) == "locked"
            end
            "#,
            base.clone(),
            "tamper",
        )
        .unwrap();
    let shout = engine
        .create_lua_script(
            r#"
            function interface(IN, OUT) OUT.text = Type:String() end
            function run(IN, OUT) OUT.text = ("abc"):upper() end
            "#,
            base,
            "shout",
        )
        .unwrap();

    assert!(engine.update());
    assert!(output::<bool>(&engine, tamper, "hidden"));
    assert!(output::<bool>(&engine, tamper, "tables"));
    assert_eq!(output::<String>(&engine, shout, "text"), "ABC");
}

#[test]
fn modules_export_type_declarations_and_data() {
    let mut engine = LogicEngine::new().unwrap();
    let types = engine
        .create_lua_module(
            r#"
            return {
                point = { x = Type:Float(), y = Type:Float() },
                origin = { x = 1.5, y = -2 },
                list = { 4, 5, 6 },
                up = { 0, 1, 0 },
            }
            "#,
            LuaConfig::new(),
            "types",
        )
        .unwrap();
    let user = engine
        .create_lua_script(
            r#"
            modules("t")
            function interface(IN, OUT)
                IN.a = t.point
                OUT.b = t.point
                OUT.list = Type:Array(3, Type:Int32())
                OUT.up = Type:Vec3f()
            end
            function run(IN, OUT)
                OUT.b = t.origin
                OUT.list = t.list
                OUT.up = t.up
            end
            "#,
            LuaConfig::new().with_module("t", types),
            "user",
        )
        .unwrap();

    assert!(engine.input(user, "a.x").is_some());
    assert!(engine.input(user, "a.y").is_some());
    assert!(engine.update(), "{:?}", engine.errors());
    assert_eq!(output::<f32>(&engine, user, "b.x"), 1.5);
    assert_eq!(output::<f32>(&engine, user, "b.y"), -2.0);
    assert_eq!(output::<i32>(&engine, user, "list.2"), 6);
    assert_eq!(output::<Vec3>(&engine, user, "up"), Vec3::Y);
}

#[test]
fn transitive_module_dependencies_stay_hidden() {
    let mut engine = LogicEngine::new().unwrap();
    let base = engine
        .create_lua_module("return { value = 2 }", LuaConfig::new(), "base")
        .unwrap();
    let derived = engine
        .create_lua_module(
            "modules('base') return { value = base.value * 2 }",
            LuaConfig::new().with_module("base", base),
            "derived",
        )
        .unwrap();
    let user = engine
        .create_lua_script(
            r#"
            modules("d")
            function interface(IN, OUT) OUT.v = Type:Int32() end
            function run(IN, OUT) OUT.v = d.value + base.value end
            "#,
            LuaConfig::new().with_module("d", derived),
            "user",
        )
        .unwrap();

    assert!(!engine.update());
    let entry = &engine.errors()[0];
    assert_eq!(entry.node, Some(user));
    assert_eq!(entry.kind, ErrorKind::Isolation);
    assert!(entry.message.contains("Unexpected global access to key 'base' in run()!"));
}

#[test]
fn modifying_modules_while_declaring_the_interface_fails() {
    let mut engine = LogicEngine::new().unwrap();
    let module = engine
        .create_lua_module("return { a = 0 }", LuaConfig::new(), "data")
        .unwrap();
    let err = engine
        .create_lua_script(
            r#"
            modules("m")
            function interface(IN, OUT) m.a = 1 end
            function run(IN, OUT) end
            "#,
            LuaConfig::new().with_module("m", module),
            "declarer",
        )
        .unwrap_err();
    assert_eq!(ErrorKind::from(&err), ErrorKind::Isolation);
    assert!(err.to_string().contains("Modifying module data is not allowed! (key 'a')"));
    assert!(engine.find_node("declarer").is_none());
}

#[test]
fn undeclared_globals_are_isolation_errors() {
    let mut engine = LogicEngine::new().unwrap();
    let err = engine
        .create_lua_script(
            "leaked = 1 function interface(IN, OUT) end function run(IN, OUT) end",
            LuaConfig::new(),
            "leaky",
        )
        .unwrap_err();
    assert_eq!(ErrorKind::from(&err), ErrorKind::Isolation);

    let reader = script(
        &mut engine,
        r#"
        function interface(IN, OUT) OUT.v = Type:Int32() end
        function run(IN, OUT) OUT.v = undefined_thing end
        "#,
        "reader",
    );
    assert!(!engine.update());
    assert_eq!(engine.errors()[0].node, Some(reader));
    assert_eq!(engine.errors()[0].kind, ErrorKind::Isolation);
}

#[test]
fn standard_modules_are_private_per_script() {
    let mut engine = LogicEngine::new().unwrap();
    let config = LuaConfig::new().with_standard_module(StandardModule::Math);
    engine
        .create_lua_script(
            r#"
            function interface(IN, OUT) end
            function run(IN, OUT) math.pi = 3 end
            "#,
            config.clone(),
            "clobber",
        )
        .unwrap();
    let reader = engine
        .create_lua_script(
            r#"
            function interface(IN, OUT) OUT.pi = Type:Float() end
            function run(IN, OUT) OUT.pi = math.pi end
            "#,
            config,
            "reader",
        )
        .unwrap();
    assert!(engine.update());
    assert_eq!(output::<f32>(&engine, reader, "pi"), std::f32::consts::PI);
}

#[test]
fn animation_drives_a_node_binding() {
    let scene = DataModel::from_objects(vec![SceneObject {
        name: "Wheel".into(),
        ..SceneObject::default()
    }]);
    let mut engine = LogicEngine::new().unwrap();
    engine.set_scene(Arc::new(scene.clone()));

    let animation = engine
        .create_animation_node(ROTATION.clone(), "spin")
        .unwrap();
    let adapter = script(
        &mut engine,
        r#"
        function interface(IN, OUT)
            IN.angle = Type:Float()
            OUT.rotation = Type:Vec3f()
        end
        function run(IN, OUT)
            OUT.rotation = {0, IN.angle, 0}
        end
        "#,
        "adapter",
    );
    let wheel = engine.create_node_binding("Wheel", "wheel").unwrap();
    link(&mut engine, animation, "angle", adapter, "angle");
    link(&mut engine, adapter, "rotation", wheel, "rotation");

    assert_eq!(output::<f32>(&engine, animation, "duration"), 1.5);
    set_input(&mut engine, animation, "progress", 0.75f32);
    assert!(engine.update());
    assert_eq!(output::<f32>(&engine, animation, "angle"), 180.0);
    assert_eq!(
        scene.get("Wheel").unwrap().rotation,
        Vec3::new(0.0, 180.0, 0.0)
    );
}

#[test]
fn save_and_load_reproduce_the_graph() {
    let mut engine = LogicEngine::new().unwrap();
    let first = script(&mut engine, INCREMENT, "first");
    let second = script(&mut engine, INCREMENT, "second");
    let animation = engine
        .create_animation_node(ROTATION.clone(), "spin")
        .unwrap();
    let timer = engine.create_timer_node("clock");
    link(&mut engine, first, "value", second, "value");
    let weak_source = engine.output(second, "value").unwrap();
    let weak_target = engine.input(first, "value").unwrap();
    engine.link_weak(&weak_source, &weak_target).unwrap();
    set_input(&mut engine, animation, "progress", 1.5f32);
    set_input(&mut engine, timer, "ticker_us", 77i64);
    assert!(engine.update());

    let bytes = engine.save_to_buffer().unwrap();
    let mut loaded = LogicEngine::new().unwrap();
    loaded.load_from_buffer(&bytes, true).unwrap();

    let names: Vec<&str> = loaded.nodes().iter().map(|(_, node)| node.name()).collect();
    assert_eq!(names, ["first", "second", "spin", "clock"]);
    assert_eq!(loaded.links().count(), 2);
    assert_eq!(
        loaded.links().filter(|(_, link)| link.is_weak()).count(),
        1
    );

    let spin = loaded.find_node("spin").unwrap();
    let clock = loaded.find_node("clock").unwrap();
    let second = loaded.find_node("second").unwrap();
    assert_eq!(output::<f32>(&loaded, spin, "angle"), 360.0);
    assert_eq!(output::<i64>(&loaded, clock, "ticker_us"), 77);
    assert_eq!(
        output::<i32>(&loaded, second, "value"),
        output::<i32>(&engine, engine.find_node("second").unwrap(), "value")
    );

    let resaved = loaded.save_to_buffer().unwrap();
    assert_eq!(resaved, bytes);
}

#[test]
fn destroy_then_relink() {
    let mut engine = LogicEngine::new().unwrap();
    let a = script(&mut engine, INCREMENT, "a");
    let b = script(&mut engine, INCREMENT, "b");
    link(&mut engine, a, "value", b, "value");
    engine.destroy(a).unwrap();
    assert!(engine.destroy(a).is_err());

    let c = script(&mut engine, INCREMENT, "c");
    link(&mut engine, c, "value", b, "value");
    set_input(&mut engine, c, "value", 1);
    assert!(engine.update());
    assert_eq!(output::<i32>(&engine, b, "value"), 3);
}
