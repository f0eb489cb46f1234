use super::{json_pretty, print_index, Context, Failure, EXIT_SUCCESS};
use mlist_core::InspectionSource;

pub fn run(ctx: &Context, name: &str) -> Result<u8, Failure> {
    let inspection = ctx.manager.inspect_index(name, &ctx.cancel)?;
    if ctx.json {
        println!("{}", json_pretty(&inspection)?);
    } else {
        print_index(&inspection.name, &inspection.index);
        if inspection.source == InspectionSource::Remote {
            println!("(fetched from the registry, not stored locally)");
        }
    }
    Ok(EXIT_SUCCESS)
}
