use super::{json_pretty, print_index, with_spinner, Context, Failure, EXIT_SUCCESS};
use mlist_core::{CoreError, CreateOptions};
use mlist_schema::{Format, ImageReference};

pub fn run(
    ctx: &Context,
    name: &str,
    references: &[String],
    format: Option<String>,
    publish: bool,
) -> Result<u8, Failure> {
    check_arguments(references, format.as_deref())?;
    let _lock = ctx.manager.lock(name)?;
    let options = CreateOptions { format, publish };
    let report = with_spinner(
        ctx.json,
        &format!("resolving {} manifests", references.len()),
        "index created",
        || {
            ctx.manager
                .create_index(name, references, &options, &ctx.cancel)
        },
    )?;

    if ctx.json {
        println!("{}", json_pretty(&report)?);
    } else {
        print_index(&report.name, &report.index);
        match report.digest {
            Some(ref digest) => println!("published as {digest}"),
            None => println!("saved locally; run 'mlist push {name}' to publish"),
        }
    }
    Ok(EXIT_SUCCESS)
}

/// Reject a bad format or reference before the lock file is created.
fn check_arguments(references: &[String], format: Option<&str>) -> Result<(), CoreError> {
    if let Some(f) = format {
        f.parse::<Format>()?;
    }
    for reference in references {
        ImageReference::parse(reference)?;
    }
    Ok(())
}
