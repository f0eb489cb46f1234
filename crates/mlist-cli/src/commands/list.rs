use super::{json_pretty, Context, Failure, EXIT_SUCCESS};

pub fn run(ctx: &Context) -> Result<u8, Failure> {
    let names = ctx.manager.list_indexes()?;
    if ctx.json {
        println!("{}", json_pretty(&names)?);
    } else if names.is_empty() {
        println!("no local indexes");
    } else {
        for name in &names {
            println!("{name}");
        }
    }
    Ok(EXIT_SUCCESS)
}
