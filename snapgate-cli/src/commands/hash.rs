//! Hash command implementation.

use std::path::PathBuf;

use anyhow::Result;
use colored::Colorize;
use snapgate_core::PerceptualHash;
use tracing::info;

use crate::exit_codes::SUCCESS;
use crate::utils::load_image;

/// Print the perceptual hash of `file`.
pub fn execute(file: PathBuf, bits: u32, quiet: bool) -> Result<i32> {
    let image = load_image(&file)?;
    let hash = PerceptualHash::derive(&image, bits);
    info!(path = %file.display(), bits, set = hash.count_ones(), "Hashed image");

    if quiet {
        println!("{hash}");
    } else {
        println!("{} {}", "Hash:".dimmed(), hash);
        println!(
            "{} {} of budget {}",
            "Bits:".dimmed(),
            PerceptualHash::bit_len(bits),
            bits
        );
    }
    Ok(SUCCESS)
}
