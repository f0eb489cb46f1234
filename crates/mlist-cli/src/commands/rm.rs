use super::{json_pretty, print_index, Context, Failure, EXIT_SUCCESS};

pub fn run(ctx: &Context, name: &str, manifest: &str) -> Result<u8, Failure> {
    let _lock = ctx.manager.lock(name)?;
    let index = ctx.manager.remove_manifest(name, manifest, &ctx.cancel)?;
    if ctx.json {
        println!("{}", json_pretty(&index)?);
    } else {
        print_index(name, &index);
    }
    Ok(EXIT_SUCCESS)
}
