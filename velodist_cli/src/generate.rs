use std::path::PathBuf;

use clap::Subcommand;
use velodist_matrix::progress::ProgressSnapshot;

#[derive(Subcommand)]
pub enum GenerateSubcommands {
    /// JSON Schema of the progress snapshot file
    SnapshotSchema {
        /// Output file, stdout when omitted
        #[arg(long, short = 'o')]
        out: Option<PathBuf>,
    },
}

pub fn run(subcommand: GenerateSubcommands) -> Result<(), anyhow::Error> {
    match subcommand {
        GenerateSubcommands::SnapshotSchema { out } => {
            let schema = serde_json::to_string_pretty(&schemars::schema_for!(ProgressSnapshot))?;

            match out {
                Some(out) => {
                    if let Some(parent) = out.parent() {
                        std::fs::create_dir_all(parent)?;
                    }

                    std::fs::write(out, schema)?;
                }
                None => println!("{schema}"),
            }
        }
    }

    Ok(())
}
