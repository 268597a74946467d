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
use std::{io, path::Path};

use tracing::{info, span, warn, Level};

use crate::{conductor::Conductor, songs::Songs, util::duration_minutes_seconds};

const EXIT: usize = 0;

/// What the user picked from the menu.
#[derive(Debug, PartialEq, Eq)]
enum Selection {
    Song(usize),
    Exit,
}

/// Runs the song selection loop until the user enters 0 or the input ends. The song directory
/// is rescanned before every prompt so new files show up without a restart.
pub fn run<R, W>(
    conductor: &Conductor,
    songs_dir: &Path,
    mut reader: R,
    mut writer: W,
) -> Result<(), io::Error>
where
    R: io::BufRead,
    W: io::Write,
{
    let span = span!(Level::INFO, "menu");
    let _enter = span.enter();

    loop {
        let songs = Songs::scan(songs_dir)?;

        writeln!(writer, "Enter a number of a song to play or {} to exit.", EXIT)?;
        for (index, entry) in songs.list().iter().enumerate() {
            writeln!(writer, "{}. {}", index + 1, entry.name)?;
        }

        let selection = match read_selection(&mut reader, &mut writer, songs.len())? {
            Some(selection) => selection,
            None => {
                info!("Input closed, exiting.");
                return Ok(());
            }
        };

        let number = match selection {
            Selection::Exit => return Ok(()),
            Selection::Song(number) => number,
        };
        let entry = match songs.get(number) {
            Some(entry) => entry,
            None => continue,
        };

        let session = conductor.load_song(&entry.path);
        match conductor.play(&session) {
            Ok(report) => writeln!(
                writer,
                "Played {} ({} notes, {} members) in {}.",
                report.song,
                report.notes_cued,
                report.members,
                duration_minutes_seconds(report.elapsed)
            )?,
            Err(e) => writeln!(writer, "Error: {}", e)?,
        }
    }
}

/// Prompts until a valid selection is entered. Returns None when the input ends.
fn read_selection<R, W>(
    reader: &mut R,
    writer: &mut W,
    num_songs: usize,
) -> Result<Option<Selection>, io::Error>
where
    R: io::BufRead,
    W: io::Write,
{
    loop {
        write!(writer, "Enter number: ")?;
        writer.flush()?;

        let mut input = String::default();
        if reader.read_line(&mut input)? == 0 {
            return Ok(None);
        }

        match input.trim().parse::<usize>() {
            Ok(EXIT) => return Ok(Some(Selection::Exit)),
            Ok(number) if number <= num_songs => return Ok(Some(Selection::Song(number))),
            _ => {
                warn!(input = input.trim(), "Unrecognized input");
                writeln!(writer, "Please enter a valid input")?;
            }
        }
    }
}
