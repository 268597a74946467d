// Copyright (C) 2026 Michael Wilson <mike@mdwn.dev>
//
// This program is free software: you can redistribute it and/or modify it under
// the terms of the GNU General Public License as published by the Free Software
// Foundation, version 3.
//
// This program is distributed in the hope that it will be useful, but WITHOUT
// ANY WARRANTY; without even the implied warranty of MERCHANTABILITY or FITNESS
// FOR A PARTICULAR PURPOSE. See the GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License along with
// this program. If not, see <https://www.gnu.org/licenses/>.
//
use std::error::Error;
use std::io;
use std::path::PathBuf;

use bellchoir::config::{self, Player};
use bellchoir::notes::DEFAULT_MEASURE_LENGTH;
use bellchoir::songs::Songs;
use bellchoir::util::duration_minutes_seconds;
use bellchoir::{audio, menu};
use clap::{crate_version, Parser, Subcommand};

#[derive(Parser)]
#[clap(
    author = "Michael Wilson",
    version = crate_version!(),
    about = "A hand-bell choir. Every pitch in a song gets its own bell ringer."
)]
struct Cli {
    #[clap(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Lists and verifies all songs in the given directory.
    Songs {
        /// The path to the song directory.
        path: String,
    },
    /// Lists the available audio output devices.
    Devices {},
    /// Plays a single song file.
    Play {
        /// The path to the song file.
        song_path: String,
        /// The path to the player config.
        #[arg[short, long]]
        config: Option<String>,
        /// The device to play through. Overrides the player config.
        #[arg[short, long]]
        device: Option<String>,
        /// Serialize bell writes to the device with a lock.
        #[arg[short, long]]
        exclusive_output: bool,
    },
    /// Start will run the song selection loop.
    Start {
        /// The path to the player config.
        player_path: String,
    },
}

fn main() -> Result<(), Box<dyn Error>> {
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Songs { path } => {
            let songs = Songs::scan(&PathBuf::from(&path))?;

            if songs.is_empty() {
                println!("No songs found in {}.", path.as_str());
                return Ok(());
            }

            println!("Songs (count: {}):", songs.len());
            for entry in songs.list() {
                match entry.load() {
                    Ok(song) => println!(
                        "- {} [{}]",
                        song,
                        duration_minutes_seconds(song.duration(DEFAULT_MEASURE_LENGTH))
                    ),
                    Err(e) => println!("- {} (invalid: {})", entry.name, e),
                }
            }
        }
        Commands::Devices {} => {
            let devices = audio::list_devices()?;

            if devices.is_empty() {
                println!("No devices found.");
                return Ok(());
            }

            println!("Devices:");
            for device in devices {
                println!("- {}", device);
            }
        }
        Commands::Play {
            song_path,
            config,
            device,
            exclusive_output,
        } => {
            let mut player = match config {
                Some(config) => config::parse_player(&PathBuf::from(config))?,
                None => Player::default(),
            };
            if let Some(device) = device {
                player.set_device(&device);
            }
            if exclusive_output {
                player.set_exclusive_output(true);
            }

            let conductor = config::init_conductor(&player)?;
            let session = conductor.load_song(&PathBuf::from(song_path));
            let report = conductor.play(&session)?;
            println!(
                "Played {} ({} notes, {} members) in {}.",
                report.song,
                report.notes_cued,
                report.members,
                duration_minutes_seconds(report.elapsed)
            );
        }
        Commands::Start { player_path } => {
            let player = config::parse_player(&PathBuf::from(player_path))?;
            let conductor = config::init_conductor(&player)?;
            menu::run(&conductor, &player.songs(), io::stdin().lock(), io::stdout())?;
        }
    }

    Ok(())
}
