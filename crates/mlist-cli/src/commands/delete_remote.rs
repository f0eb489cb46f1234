use super::{json_pretty, with_spinner, Context, Failure, EXIT_SUCCESS};

pub fn run(ctx: &Context, name: &str) -> Result<u8, Failure> {
    let digest = with_spinner(ctx.json, &format!("deleting {name}"), "deleted", || {
        ctx.manager.delete_published_index(name, &ctx.cancel)
    })?;
    if ctx.json {
        let payload = serde_json::json!({ "name": name, "digest": digest });
        println!("{}", json_pretty(&payload)?);
    } else {
        println!("deleted {name} ({digest}) from the registry");
    }
    Ok(EXIT_SUCCESS)
}
