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
use std::{
    collections::HashSet,
    fmt, fs, io,
    path::{Path, PathBuf},
    time::Duration,
};

use thiserror::Error;
use tracing::{debug, warn};

use crate::notes::Pitch;

const SONG_EXTENSION: &str = "txt";

/// How long a note rings, as a fraction of a measure.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum NoteLength {
    Whole,
    Half,
    Quarter,
    Eighth,
    Sixteenth,
}

impl NoteLength {
    /// Parses the length code used in song files.
    pub fn from_code(code: &str) -> Option<NoteLength> {
        match code {
            "1" => Some(NoteLength::Whole),
            "2" => Some(NoteLength::Half),
            "4" => Some(NoteLength::Quarter),
            "8" => Some(NoteLength::Eighth),
            "16" => Some(NoteLength::Sixteenth),
            _ => None,
        }
    }

    /// The number of these notes that fit in a measure.
    pub fn divisor(&self) -> u32 {
        match self {
            NoteLength::Whole => 1,
            NoteLength::Half => 2,
            NoteLength::Quarter => 4,
            NoteLength::Eighth => 8,
            NoteLength::Sixteenth => 16,
        }
    }

    /// The wall clock duration of the note for the given measure length.
    pub fn duration(&self, measure_length: Duration) -> Duration {
        measure_length / self.divisor()
    }
}

impl fmt::Display for NoteLength {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "1/{}", self.divisor())
    }
}

/// A pitch paired with how long it rings. One line of a song file.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BellNote {
    pub pitch: Pitch,
    pub length: NoteLength,
}

impl BellNote {
    pub fn new(pitch: Pitch, length: NoteLength) -> BellNote {
        BellNote { pitch, length }
    }
}

/// Why a song file line was rejected.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FormatReason {
    #[error("expected exactly two items, found {0}")]
    MalformedLine(usize),
    #[error("unknown note length {0}")]
    UnknownLength(String),
    #[error("unknown pitch {0}")]
    UnknownPitch(String),
}

/// A song file line that couldn't be parsed. Line numbers start at 1.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("song format error on line {line}: {reason}")]
pub struct SongFormatError {
    pub line: usize,
    pub reason: FormatReason,
}

/// Errors that prevent a song from being loaded.
#[derive(Debug, Error)]
pub enum LoadError {
    #[error("unable to read song file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error(transparent)]
    Format(#[from] SongFormatError),
}

/// A song is an ordered list of bell notes. It's read-only once parsed.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Song {
    /// The name of the song.
    name: String,
    /// The notes in the order they're played.
    notes: Vec<BellNote>,
}

impl Song {
    /// Creates a song from already parsed notes.
    pub fn new(name: &str, notes: Vec<BellNote>) -> Song {
        Song {
            name: name.to_string(),
            notes,
        }
    }

    /// Parses a song from the contents of a song file. Parsing stops at the first bad line and
    /// no partial song is returned.
    pub fn parse(name: &str, contents: &str) -> Result<Song, SongFormatError> {
        let notes = contents
            .lines()
            .enumerate()
            .map(|(index, line)| parse_line(index + 1, line))
            .collect::<Result<Vec<BellNote>, SongFormatError>>()?;

        debug!(song = name, notes = notes.len(), "Parsed song.");
        Ok(Song::new(name, notes))
    }

    /// Loads a song from a file. The song is named after the file stem.
    pub fn load(path: &Path) -> Result<Song, LoadError> {
        let contents = fs::read_to_string(path).map_err(|source| LoadError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let name = path
            .file_stem()
            .and_then(|stem| stem.to_str())
            .unwrap_or("unreadable song name");

        Ok(Song::parse(name, &contents)?)
    }

    /// Gets the name of the song.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Gets the notes of the song.
    pub fn notes(&self) -> &[BellNote] {
        &self.notes
    }

    /// Returns true if the song has no notes.
    pub fn is_empty(&self) -> bool {
        self.notes.is_empty()
    }

    /// The distinct pitches in the song in the order they first appear.
    pub fn pitches(&self) -> Vec<Pitch> {
        let mut seen = HashSet::new();
        self.notes
            .iter()
            .map(|note| note.pitch)
            .filter(|pitch| seen.insert(*pitch))
            .collect()
    }

    /// The total duration of the song at the given measure length.
    pub fn duration(&self, measure_length: Duration) -> Duration {
        self.notes
            .iter()
            .map(|note| note.length.duration(measure_length))
            .sum()
    }
}

impl fmt::Display for Song {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} (Notes: {}, Pitches: {})",
            self.name,
            self.notes.len(),
            self.pitches().len()
        )
    }
}

fn parse_line(line_number: usize, line: &str) -> Result<BellNote, SongFormatError> {
    let error = |reason| SongFormatError {
        line: line_number,
        reason,
    };

    let tokens: Vec<&str> = line.split_whitespace().collect();
    if tokens.len() != 2 {
        return Err(error(FormatReason::MalformedLine(tokens.len())));
    }

    let length = NoteLength::from_code(tokens[1])
        .ok_or_else(|| error(FormatReason::UnknownLength(tokens[1].to_string())))?;
    let pitch = tokens[0]
        .parse::<Pitch>()
        .map_err(|_| error(FormatReason::UnknownPitch(tokens[0].to_string())))?;

    Ok(BellNote::new(pitch, length))
}

/// A song file found in a song directory.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SongEntry {
    pub name: String,
    pub path: PathBuf,
}

impl SongEntry {
    /// Loads the song from disk.
    pub fn load(&self) -> Result<Song, LoadError> {
        Song::load(&self.path)
    }
}

/// The song files available in a directory, sorted by name.
pub struct Songs {
    entries: Vec<SongEntry>,
}

impl Songs {
    /// Scans the directory for song files. Sub directories and other files are ignored.
    pub fn scan(path: &Path) -> Result<Songs, io::Error> {
        let mut entries = Vec::new();
        for entry in fs::read_dir(path)? {
            let entry = entry?;
            let path = entry.path();

            if !entry.file_type()?.is_file() {
                continue;
            }
            if !path.extension().is_some_and(|ext| ext == SONG_EXTENSION) {
                continue;
            }

            match path.file_stem().and_then(|stem| stem.to_str()) {
                Some(name) => entries.push(SongEntry {
                    name: name.to_string(),
                    path: path.clone(),
                }),
                None => warn!(path = ?path, "Ignoring song file with an unreadable name."),
            }
        }

        entries.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(Songs { entries })
    }

    /// Returns the entries in listing order.
    pub fn list(&self) -> &[SongEntry] {
        &self.entries
    }

    /// Gets an entry by its menu number, which starts at 1.
    pub fn get(&self, number: usize) -> Option<&SongEntry> {
        number.checked_sub(1).and_then(|index| self.entries.get(index))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod test {
    use std::{error::Error, fs, time::Duration};

    use super::*;

    #[test]
    fn test_parse_song() -> Result<(), Box<dyn Error>> {
        let song = Song::parse("test", "A4 4\nB4 4\nREST 2\n")?;

        assert_eq!("test", song.name());
        assert_eq!(
            vec![
                BellNote::new(Pitch::A4, NoteLength::Quarter),
                BellNote::new(Pitch::B4, NoteLength::Quarter),
                BellNote::new(Pitch::Rest, NoteLength::Half),
            ],
            song.notes()
        );
        assert_eq!(vec![Pitch::A4, Pitch::B4, Pitch::Rest], song.pitches());
        Ok(())
    }

    #[test]
    fn test_parse_all_lengths() -> Result<(), Box<dyn Error>> {
        let song = Song::parse("lengths", "A4 1\r\nA4 2\r\nA4 4\r\nA4 8\r\nA4 16\r\n")?;
        let lengths: Vec<NoteLength> = song.notes().iter().map(|note| note.length).collect();

        assert_eq!(
            vec![
                NoteLength::Whole,
                NoteLength::Half,
                NoteLength::Quarter,
                NoteLength::Eighth,
                NoteLength::Sixteenth,
            ],
            lengths
        );
        assert_eq!(vec![Pitch::A4], song.pitches());
        Ok(())
    }

    #[test]
    fn test_parse_errors_cite_line() {
        let cases = [
            ("A4 4\nB4 3\n", 2, FormatReason::UnknownLength("3".to_string())),
            ("A4 4\nA4 4\nH4 4\n", 3, FormatReason::UnknownPitch("H4".to_string())),
            ("A4 4 4\n", 1, FormatReason::MalformedLine(3)),
            ("A4\n", 1, FormatReason::MalformedLine(1)),
            ("A4 4\n\nA4 4\n", 2, FormatReason::MalformedLine(0)),
        ];

        for (contents, line, reason) in cases {
            assert_eq!(
                Err(SongFormatError { line, reason }),
                Song::parse("bad", contents),
                "contents: {:?}",
                contents
            );
        }
    }

    #[test]
    fn test_parse_whitespace_separators() -> Result<(), Box<dyn Error>> {
        // Any run of spaces or tabs separates the two tokens.
        let song = Song::parse("spaced", "A4  4
B4	8
  C4 16  
")?;

        assert_eq!(
            vec![
                BellNote::new(Pitch::A4, NoteLength::Quarter),
                BellNote::new(Pitch::B4, NoteLength::Eighth),
                BellNote::new(Pitch::C4, NoteLength::Sixteenth),
            ],
            song.notes()
        );
        Ok(())
    }

    #[test]
    fn test_parse_empty() -> Result<(), Box<dyn Error>> {
        let song = Song::parse("empty", "")?;
        assert!(song.is_empty());
        assert!(song.pitches().is_empty());
        Ok(())
    }

    #[test]
    fn test_note_length_durations() {
        let measure = Duration::from_secs(1);
        assert_eq!(Duration::from_secs(1), NoteLength::Whole.duration(measure));
        assert_eq!(Duration::from_millis(500), NoteLength::Half.duration(measure));
        assert_eq!(Duration::from_millis(250), NoteLength::Quarter.duration(measure));
        assert_eq!(Duration::from_millis(125), NoteLength::Eighth.duration(measure));
        assert_eq!(Duration::from_micros(62500), NoteLength::Sixteenth.duration(measure));
        assert_eq!(None, NoteLength::from_code("32"));
    }

    #[test]
    fn test_song_duration() -> Result<(), Box<dyn Error>> {
        let song = Song::parse("test", "A4 4\nB4 4\nREST 2\n")?;
        assert_eq!(Duration::from_secs(1), song.duration(Duration::from_secs(1)));
        Ok(())
    }

    #[test]
    fn test_load_and_scan() -> Result<(), Box<dyn Error>> {
        let dir = tempfile::tempdir()?;
        fs::write(dir.path().join("b-song.txt"), "A4 4\n")?;
        fs::write(dir.path().join("a-song.txt"), "B4 8\nA5 8\n")?;
        fs::write(dir.path().join("notes.md"), "not a song")?;
        fs::create_dir(dir.path().join("nested.txt"))?;

        let songs = Songs::scan(dir.path())?;
        assert_eq!(2, songs.len());
        assert_eq!("a-song", songs.list()[0].name);
        assert_eq!("b-song", songs.list()[1].name);
        assert!(songs.get(0).is_none());
        assert!(songs.get(3).is_none());

        let song = songs.get(1).expect("first song").load()?;
        assert_eq!("a-song", song.name());
        assert_eq!(2, song.notes().len());
        Ok(())
    }

    #[test]
    fn test_load_missing_file() {
        let result = Song::load(Path::new("/definitely/not/a/song.txt"));
        assert!(matches!(result, Err(LoadError::Io { .. })));
    }
}
