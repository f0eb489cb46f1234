use super::{json_pretty, print_index, with_spinner, Context, Failure, EXIT_SUCCESS};
use mlist_schema::PlatformUpdate;

pub fn run(
    ctx: &Context,
    name: &str,
    manifest: &str,
    overrides: &PlatformUpdate,
) -> Result<u8, Failure> {
    let _lock = ctx.manager.lock(name)?;
    let index = with_spinner(
        ctx.json,
        &format!("resolving {manifest}"),
        "manifest added",
        || {
            ctx.manager
                .add_manifest(name, manifest, overrides, &ctx.cancel)
        },
    )?;
    if ctx.json {
        println!("{}", json_pretty(&index)?);
    } else {
        print_index(name, &index);
    }
    Ok(EXIT_SUCCESS)
}
