use std::env;
use std::fs;
use std::sync::Arc;

use anyhow::{anyhow, bail, Context, Result};
use log::info;

use crystal_logic::{DataModel, LogicEngine, LogicNode, PropertyValue, Scene};

fn main() {
    env_logger::init();
    if let Err(err) = run() {
        eprintln!("Error: {err:?}");
        std::process::exit(1);
    }
}

fn run() -> Result<()> {
    let options = CliOptions::parse(env::args().skip(1))?;
    let mut engine = LogicEngine::new().context("failed to create logic engine")?;

    let model = match &options.scene {
        Some(path) => {
            let xml = fs::read_to_string(path)
                .with_context(|| format!("unable to read scene {path}"))?;
            let scene = Scene::from_xml(&xml).context("failed to parse scene XML")?;
            let model = DataModel::from_scene(&scene);
            engine.set_scene(Arc::new(model.clone()));
            Some(model)
        }
        None => None,
    };

    engine
        .load_from_file(&options.path, options.validate)
        .with_context(|| format!("failed to load {}", options.path))?;
    println!("Loaded {} node(s), {} link(s)", engine.nodes().len(), engine.links().count());

    for assignment in &options.assignments {
        apply_assignment(&mut engine, assignment)?;
    }

    for tick in 1..=options.updates {
        if !engine.update() {
            let messages: Vec<String> = engine
                .errors()
                .iter()
                .map(|entry| format!("  {}", entry.message))
                .collect();
            bail!("update {tick} failed:\n{}", messages.join("\n"));
        }
    }
    info!("ran {} update(s)", options.updates);

    print_outputs(&engine);
    if let Some(model) = &model {
        print_final_state(model);
    }
    Ok(())
}

/// `node.path=value`, where the path may itself contain dots.
fn apply_assignment(engine: &mut LogicEngine, assignment: &str) -> Result<()> {
    let (target, text) = assignment
        .split_once('=')
        .ok_or_else(|| anyhow!("expected node.path=value, got '{assignment}'"))?;
    let (node_name, path) = target
        .split_once('.')
        .ok_or_else(|| anyhow!("expected node.path=value, got '{assignment}'"))?;
    let node = engine
        .find_node(node_name)
        .ok_or_else(|| anyhow!("no node named '{node_name}'"))?;
    let handle = engine
        .input(node, path)
        .ok_or_else(|| anyhow!("node '{node_name}' has no input '{path}'"))?;
    let ty = engine
        .property(&handle)
        .map(|property| property.property_type())
        .ok_or_else(|| anyhow!("node '{node_name}' has no input '{path}'"))?;
    let value = PropertyValue::parse(ty, text)
        .ok_or_else(|| anyhow!("cannot parse '{text}' as {ty} for {target}"))?;
    engine
        .set_property(&handle, value)
        .with_context(|| format!("failed to set {target}"))?;
    Ok(())
}

fn print_outputs(engine: &LogicEngine) {
    println!("Node outputs:");
    for (_, node) in engine.nodes() {
        print_node(node);
    }
}

fn print_node(node: &LogicNode) {
    println!(" - {} ({})", node.name(), node.type_name());
    let outputs = node.outputs();
    outputs.for_each_leaf(&mut |path, property| {
        if let Some(value) = property.value() {
            println!("     {} = {value}", outputs.path_name(path));
        }
    });
}

fn print_final_state(model: &DataModel) {
    println!("Final object states:");
    for object in model.all_objects() {
        println!(
            " - {} visible={} pos=({:.2}, {:.2}, {:.2}) rot=({:.2}, {:.2}, {:.2}) scale=({:.2}, {:.2}, {:.2})",
            object.name,
            object.visible,
            object.position.x,
            object.position.y,
            object.position.z,
            object.rotation.x,
            object.rotation.y,
            object.rotation.z,
            object.scale.x,
            object.scale.y,
            object.scale.z
        );
        for uniform in &object.uniforms {
            println!("     {} = {}", uniform.name, uniform.value);
        }
    }
}

#[derive(Debug, PartialEq)]
struct CliOptions {
    path: String,
    scene: Option<String>,
    updates: u32,
    assignments: Vec<String>,
    validate: bool,
}

const USAGE: &str = "Usage: crystal-logic <file.clogic> [--scene scene.xml] [--updates N] \
                     [--set node.path=value]... [--no-validate]";

impl CliOptions {
    fn parse(args: impl IntoIterator<Item = String>) -> Result<Self> {
        let mut args = args.into_iter();
        let mut path = None;
        let mut scene = None;
        let mut updates = 1;
        let mut assignments = Vec::new();
        let mut validate = true;
        while let Some(arg) = args.next() {
            match arg.as_str() {
                "--scene" => {
                    scene = Some(args.next().ok_or_else(|| anyhow!("--scene needs a path"))?);
                }
                "--updates" => {
                    let count = args.next().ok_or_else(|| anyhow!("--updates needs a count"))?;
                    updates = count
                        .parse()
                        .with_context(|| format!("invalid update count '{count}'"))?;
                }
                "--set" => {
                    assignments.push(
                        args.next()
                            .ok_or_else(|| anyhow!("--set needs node.path=value"))?,
                    );
                }
                "--no-validate" => validate = false,
                other if other.starts_with("--") => {
                    return Err(anyhow!("Unknown argument: {other}. {USAGE}"));
                }
                other if path.is_none() => path = Some(other.to_string()),
                other => return Err(anyhow!("Unexpected argument: {other}. {USAGE}")),
            }
        }
        let Some(path) = path else {
            return Err(anyhow!(USAGE));
        };
        Ok(Self {
            path,
            scene,
            updates,
            assignments,
            validate,
        })
    }
}
