use super::{json_pretty, Context, Failure, EXIT_SUCCESS};

pub fn run(ctx: &Context, name: &str) -> Result<u8, Failure> {
    let _lock = ctx.manager.lock(name)?;
    ctx.manager.delete_index(name)?;
    if ctx.json {
        let payload = serde_json::json!({ "name": name, "deleted": true });
        println!("{}", json_pretty(&payload)?);
    } else {
        println!("deleted local index '{name}'");
    }
    Ok(EXIT_SUCCESS)
}
