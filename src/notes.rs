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

//! Note naming for the 88-key range.
//!
//! Sample sets name their files after the note ("Csharp4", "A0", ...), so the
//! store needs a bidirectional mapping between those names and MIDI note
//! numbers. The playable range is A0 (21) through C8 (108).

/// The lowest MIDI note on an 88-key keyboard (A0).
pub const NOTE_MIN: u8 = 21;

/// The highest MIDI note on an 88-key keyboard (C8).
pub const NOTE_MAX: u8 = 108;

/// Note names within an octave, starting at C. Sharps are spelled out since
/// the names double as file name components.
const SEMITONE_NAMES: [&str; 12] = [
    "C", "Csharp", "D", "Dsharp", "E", "F", "Fsharp", "G", "Gsharp", "A", "Asharp", "B",
];

/// Iterates over every MIDI note number on the keyboard.
pub fn note_range() -> impl Iterator<Item = u8> {
    NOTE_MIN..=NOTE_MAX
}

/// Returns the name for a MIDI note number, or None if the note is outside
/// the 88-key range.
pub fn note_name(note: u8) -> Option<String> {
    if !(NOTE_MIN..=NOTE_MAX).contains(&note) {
        return None;
    }
    let semitone = SEMITONE_NAMES[(note % 12) as usize];
    let octave = (note / 12) as i8 - 1;
    Some(format!("{}{}", semitone, octave))
}

/// Parses a note name ("Csharp4") back into a MIDI note number. Returns None
/// for malformed names or notes outside the 88-key range.
pub fn note_number(name: &str) -> Option<u8> {
    let split = name.find(|c: char| c.is_ascii_digit())?;
    let (semitone, octave) = name.split_at(split);
    let semitone = SEMITONE_NAMES.iter().position(|s| *s == semitone)?;
    let octave: i16 = octave.parse().ok()?;

    let note = (octave + 1) * 12 + semitone as i16;
    if (NOTE_MIN as i16..=NOTE_MAX as i16).contains(&note) {
        Some(note as u8)
    } else {
        None
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_note_names() {
        assert_eq!(note_name(21).as_deref(), Some("A0"));
        assert_eq!(note_name(22).as_deref(), Some("Asharp0"));
        assert_eq!(note_name(60).as_deref(), Some("C4"));
        assert_eq!(note_name(61).as_deref(), Some("Csharp4"));
        assert_eq!(note_name(108).as_deref(), Some("C8"));
        assert_eq!(note_name(20), None);
        assert_eq!(note_name(109), None);
    }

    #[test]
    fn test_note_numbers() {
        assert_eq!(note_number("A0"), Some(21));
        assert_eq!(note_number("Csharp4"), Some(61));
        assert_eq!(note_number("C8"), Some(108));
        assert_eq!(note_number("C0"), None); // Below the keyboard.
        assert_eq!(note_number("H4"), None);
        assert_eq!(note_number("Csharp"), None);
    }

    #[test]
    fn test_round_trip() {
        for note in note_range() {
            let name = note_name(note).expect("name for in-range note");
            assert_eq!(note_number(&name), Some(note));
        }
        assert_eq!(note_range().count(), 88);
    }
}
