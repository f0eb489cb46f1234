use super::{json_pretty, print_index, Context, Failure, EXIT_SUCCESS};
use mlist_schema::PlatformUpdate;

pub fn run(
    ctx: &Context,
    name: &str,
    manifest: &str,
    update: &PlatformUpdate,
) -> Result<u8, Failure> {
    if update.is_empty() {
        tracing::warn!("no platform fields given, {manifest} is left as it is");
    }
    let _lock = ctx.manager.lock(name)?;
    let index = ctx
        .manager
        .annotate_manifest(name, manifest, update, &ctx.cancel)?;
    if ctx.json {
        println!("{}", json_pretty(&index)?);
    } else {
        print_index(name, &index);
    }
    Ok(EXIT_SUCCESS)
}
