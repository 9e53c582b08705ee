use anyhow::Result;

fn main() -> Result<()> {
    cartbench::cli::execute()
}
