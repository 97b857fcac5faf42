//! Built-in commands
//!
//! | name              | params                                                  |
//! |-------------------|---------------------------------------------------------|
//! | `add_node`        | `type`, `parent`?, `id`?, `position`?, `properties`?    |
//! | `remove_node`     | `id`                                                    |
//! | `move_node`       | `id`, `parent`, `position`?                             |
//! | `set_property`    | `id`, `property`, `value`                               |
//! | `remove_property` | `id`, `property`                                        |
//! | `select`          | `ids`                                                   |
//! | `batch`           | `steps`: list of `{command, params}` maps               |
//!
//! `parent` defaults to the root and `position` to the end of the child list.
//! `batch` runs each step in a nested transaction; the first failing step
//! fails the whole batch.

use trellis_common::Value;

use crate::{CommandContext, CommandRegistry, EditorError, EditorResult, NodeId, Params, ParamsExt};

pub const ADD_NODE: &str = "add_node";
pub const REMOVE_NODE: &str = "remove_node";
pub const MOVE_NODE: &str = "move_node";
pub const SET_PROPERTY: &str = "set_property";
pub const REMOVE_PROPERTY: &str = "remove_property";
pub const SELECT: &str = "select";
pub const BATCH: &str = "batch";

type BuiltinFn = fn(&mut CommandContext<'_>, &Params) -> EditorResult<()>;

pub fn register_builtins(registry: &mut CommandRegistry) {
    registry.register_fn(ADD_NODE, add_node);
    registry.register_fn(REMOVE_NODE, remove_node);
    registry.register_fn(MOVE_NODE, move_node);
    registry.register_fn(SET_PROPERTY, set_property);
    registry.register_fn(REMOVE_PROPERTY, remove_property);
    registry.register_fn(SELECT, select);
    registry.register_fn(BATCH, batch);
}

fn parent_or_root(ctx: &CommandContext<'_>, params: &Params) -> EditorResult<NodeId> {
    Ok(match params.optional_text("parent")? {
        Some(parent) => NodeId::from(parent),
        None => ctx.document().root().clone(),
    })
}

fn add_node(ctx: &mut CommandContext<'_>, params: &Params) -> EditorResult<()> {
    let type_tag = params.text("type")?;
    let parent = parent_or_root(ctx, params)?;

    let mut node = match params.optional_text("id")? {
        Some(id) => ctx.document().registry().require(type_tag)?.instantiate(id),
        None => ctx.create_node(type_tag)?,
    };
    match params.get("properties") {
        None | Some(Value::Null) => {}
        Some(Value::Map(properties)) => {
            for (name, value) in properties {
                node = node.with_property(name.clone(), value.clone());
            }
        }
        Some(other) => {
            return Err(EditorError::Validation(format!(
                "parameter 'properties' must be a map, got {}",
                other
            )))
        }
    }

    let position = params.index_or("position", usize::MAX)?;
    ctx.insert_node(&parent, position, node)?;
    Ok(())
}

fn remove_node(ctx: &mut CommandContext<'_>, params: &Params) -> EditorResult<()> {
    ctx.remove_node(&params.node_id("id")?)?;
    Ok(())
}

fn move_node(ctx: &mut CommandContext<'_>, params: &Params) -> EditorResult<()> {
    let position = params.index_or("position", usize::MAX)?;
    ctx.move_node(&params.node_id("id")?, &params.node_id("parent")?, position)
}

fn set_property(ctx: &mut CommandContext<'_>, params: &Params) -> EditorResult<()> {
    let value = params.value("value")?.clone();
    ctx.set_property(&params.node_id("id")?, params.text("property")?, value)?;
    Ok(())
}

fn remove_property(ctx: &mut CommandContext<'_>, params: &Params) -> EditorResult<()> {
    ctx.remove_property(&params.node_id("id")?, params.text("property")?)?;
    Ok(())
}

fn select(ctx: &mut CommandContext<'_>, params: &Params) -> EditorResult<()> {
    let ids = params
        .value("ids")?
        .as_list()
        .ok_or_else(|| EditorError::Validation("parameter 'ids' must be a list".to_string()))?
        .iter()
        .map(|id| {
            id.as_str()
                .map(NodeId::from)
                .ok_or_else(|| EditorError::Validation(format!("node id must be text, got {}", id)))
        })
        .collect::<EditorResult<Vec<_>>>()?;
    ctx.set_selection(ids)
}

fn batch(ctx: &mut CommandContext<'_>, params: &Params) -> EditorResult<()> {
    let steps = params
        .value("steps")?
        .as_list()
        .ok_or_else(|| EditorError::Validation("parameter 'steps' must be a list".to_string()))?;

    for (index, step) in steps.iter().enumerate() {
        ctx.checkpoint()?;

        let step = step.as_map().ok_or_else(|| {
            EditorError::Validation(format!("batch step {} must be a map", index))
        })?;
        let name = step
            .get("command")
            .and_then(Value::as_str)
            .ok_or_else(|| EditorError::Validation(format!("batch step {} has no command", index)))?;
        let step_params = match step.get("params") {
            Some(Value::Map(map)) => map.clone(),
            None | Some(Value::Null) => Params::new(),
            Some(other) => {
                return Err(EditorError::Validation(format!(
                    "batch step {} params must be a map, got {}",
                    index, other
                )))
            }
        };

        let run: BuiltinFn = match name {
            ADD_NODE => add_node,
            REMOVE_NODE => remove_node,
            MOVE_NODE => move_node,
            SET_PROPERTY => set_property,
            REMOVE_PROPERTY => remove_property,
            SELECT => select,
            // Batches nest through transactions, never through commands
            other => {
                return Err(EditorError::Validation(format!(
                    "'{}' cannot run inside a batch",
                    other
                )))
            }
        };
        ctx.nested(name, |ctx| run(ctx, &step_params))?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{CommandEngine, CommandOutcome, Document, TypeRegistry, ROOT_ID};
    use std::collections::BTreeMap;
    use std::sync::Arc;

    fn engine() -> CommandEngine {
        let doc = Document::new("test", Arc::new(TypeRegistry::standard()));
        CommandEngine::new(doc, CommandRegistry::with_builtins())
    }

    fn params(pairs: &[(&str, Value)]) -> Params {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    #[test]
    fn test_add_node_with_explicit_id_and_properties() {
        let mut engine = engine();
        let mut properties = BTreeMap::new();
        properties.insert("name".to_string(), Value::from("Walls"));

        let outcome = engine
            .execute(
                ADD_NODE,
                params(&[
                    ("type", Value::from("group")),
                    ("id", Value::from("g")),
                    ("properties", Value::Map(properties)),
                ]),
            )
            .unwrap();

        assert_eq!(outcome, CommandOutcome::Committed);
        let doc = engine.document();
        let g = NodeId::from("g");
        assert_eq!(doc.parent(&g).unwrap(), Some(&NodeId::from(ROOT_ID)));
        assert_eq!(doc.property(&g, "name"), Some(&Value::from("Walls")));
        assert_eq!(doc.property(&g, "visible"), Some(&Value::Bool(true)));
    }

    #[test]
    fn test_add_node_generates_id() {
        let mut engine = engine();
        engine
            .execute(ADD_NODE, params(&[("type", Value::from("shape"))]))
            .unwrap();
        assert_eq!(engine.document().children(&ROOT_ID.into()).unwrap().len(), 1);
    }

    #[test]
    fn test_missing_param_fails_command() {
        let mut engine = engine();
        let outcome = engine.execute(REMOVE_NODE, Params::new()).unwrap();
        assert!(matches!(outcome, CommandOutcome::Failed(EditorError::Validation(_))));
    }

    #[test]
    fn test_batch_is_atomic() {
        let mut engine = engine();
        let step = |command: &str, p: Params| {
            let mut map = BTreeMap::new();
            map.insert("command".to_string(), Value::from(command));
            map.insert("params".to_string(), Value::Map(p));
            Value::Map(map)
        };

        let steps = vec![
            step(ADD_NODE, params(&[("type", Value::from("group")), ("id", Value::from("a"))])),
            step(SET_PROPERTY, params(&[
                ("id", Value::from("a")),
                ("property", Value::from("name")),
                ("value", Value::from("A")),
            ])),
            step(REMOVE_NODE, params(&[("id", Value::from("ghost"))])),
        ];
        let outcome = engine
            .execute(BATCH, params(&[("steps", Value::List(steps.clone()))]))
            .unwrap();
        assert!(matches!(outcome, CommandOutcome::Failed(EditorError::NotFound(_))));
        assert_eq!(engine.document().node_count(), 1);

        let outcome = engine
            .execute(BATCH, params(&[("steps", Value::List(steps[..2].to_vec()))]))
            .unwrap();
        assert_eq!(outcome, CommandOutcome::Committed);
        assert_eq!(engine.document().history().undo_levels(), 1);
        assert_eq!(
            engine.document().property(&"a".into(), "name"),
            Some(&Value::from("A"))
        );
    }

    #[test]
    fn test_batch_cannot_nest_batches() {
        let mut engine = engine();
        let mut step = BTreeMap::new();
        step.insert("command".to_string(), Value::from(BATCH));
        let outcome = engine
            .execute(
                BATCH,
                params(&[("steps", Value::List(vec![Value::Map(step)]))]),
            )
            .unwrap();
        assert!(matches!(outcome, CommandOutcome::Failed(EditorError::Validation(_))));
    }

    #[test]
    fn test_failed_batch_keeps_prior_selection() {
        let mut engine = engine();
        engine
            .execute(ADD_NODE, params(&[("type", Value::from("group")), ("id", Value::from("a"))]))
            .unwrap();

        let mut select = BTreeMap::new();
        select.insert("command".to_string(), Value::from(SELECT));
        select.insert(
            "params".to_string(),
            Value::Map(params(&[("ids", Value::List(vec![Value::from("a")]))])),
        );
        let mut remove = BTreeMap::new();
        remove.insert("command".to_string(), Value::from(REMOVE_NODE));
        remove.insert(
            "params".to_string(),
            Value::Map(params(&[("id", Value::from("ghost"))])),
        );

        let outcome = engine
            .execute(
                BATCH,
                params(&[("steps", Value::List(vec![Value::Map(select), Value::Map(remove)]))]),
            )
            .unwrap();
        assert!(matches!(outcome, CommandOutcome::Failed(EditorError::NotFound(_))));
        assert!(engine.document().selection().is_empty());
    }

    #[test]
    fn test_select_is_not_undoable() {
        let mut engine = engine();
        engine
            .execute(ADD_NODE, params(&[("type", Value::from("group")), ("id", Value::from("a"))]))
            .unwrap();
        engine
            .execute(SELECT, params(&[("ids", Value::List(vec![Value::from("a")]))]))
            .unwrap();

        assert_eq!(engine.document().selection(), &[NodeId::from("a")]);
        // Empty commit: selection lives outside history
        assert_eq!(engine.document().history().undo_levels(), 1);
    }
}
