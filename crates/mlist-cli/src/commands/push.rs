use super::{json_pretty, with_spinner, Context, Failure, EXIT_SUCCESS};
use mlist_core::PushOptions;

pub fn run(ctx: &Context, name: &str, purge: bool) -> Result<u8, Failure> {
    let _lock = ctx.manager.lock(name)?;
    let report = with_spinner(ctx.json, &format!("pushing {name}"), "push complete", || {
        ctx.manager.push_index(name, PushOptions { purge }, &ctx.cancel)
    })?;

    if ctx.json {
        println!("{}", json_pretty(&report)?);
    } else {
        println!(
            "pushed {} ({} manifests) as {}",
            report.reference, report.manifests, report.digest
        );
        if report.purged {
            println!("local index '{name}' removed");
        }
    }
    Ok(EXIT_SUCCESS)
}
