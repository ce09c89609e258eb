use std::error::Error;

// Build timestamp only: release tarballs are built outside a git checkout.
fn main() -> Result<(), Box<dyn Error>> {
    vergen_gitcl::Emitter::default()
        .add_instructions(
            &vergen_gitcl::BuildBuilder::default()
                .build_timestamp(true)
                .build()?,
        )?
        .emit()?;
    Ok(())
}
