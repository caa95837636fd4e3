//! Musical key parsing and key-to-pitch mapping
//!
//! Used by the ambient pad to turn a key name into a playback rate and by
//! song manifests to validate the key field.

/// MIDI note of middle C, the octave pad keys are mapped into
pub const MIDDLE_C_MIDI: u8 = 60;

/// Musical key with root note and scale
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MusicalKey {
    /// Root note as semitone offset from C (0=C, 1=C#, 2=D, ..., 11=B)
    pub root: u8,
    /// true = minor, false = major
    pub minor: bool,
}

impl MusicalKey {
    pub const fn new(root: u8, minor: bool) -> Self {
        Self {
            root: root % 12,
            minor,
        }
    }

    /// Parse key string like "Am", "C#m", "F", "Bb"
    ///
    /// Supported formats:
    /// - Single letter: C, D, E, F, G, A, B
    /// - With sharp: C#, D#, F#, G#, A#
    /// - With flat: Db, Eb, Gb, Ab, Bb
    /// - Minor suffix: Am, C#m, Bbm
    pub fn parse(s: &str) -> Option<Self> {
        let s = s.trim();
        let mut chars = s.chars().peekable();

        let base_root = match chars.next()?.to_ascii_uppercase() {
            'C' => 0,
            'D' => 2,
            'E' => 4,
            'F' => 5,
            'G' => 7,
            'A' => 9,
            'B' => 11,
            _ => return None,
        };

        let root = match chars.peek() {
            Some('#') => {
                chars.next();
                (base_root + 1) % 12
            }
            Some('b') => {
                chars.next();
                (base_root + 11) % 12
            }
            _ => base_root,
        };

        let remaining = chars.collect::<String>().to_lowercase();
        let minor = match remaining.as_str() {
            "" | "maj" | "major" => false,
            "m" | "min" | "minor" => true,
            _ => return None,
        };

        Some(Self { root, minor })
    }

    /// MIDI note of the root in the middle-C octave (C=60 ... B=71)
    pub fn midi_note(&self) -> u8 {
        MIDDLE_C_MIDI + self.root
    }

    /// Semitones from `base` up or down to this key's root, in `-11..=11`
    pub fn semitones_from(&self, base: &MusicalKey) -> i8 {
        self.midi_note() as i8 - base.midi_note() as i8
    }

    /// Playback rate that transposes a sample recorded in `base` to this key
    pub fn playback_rate_from(&self, base: &MusicalKey) -> f64 {
        2f64.powf(self.semitones_from(base) as f64 / 12.0)
    }

    fn note_name(&self) -> &'static str {
        const NAMES: [&str; 12] = ["C", "Db", "D", "Eb", "E", "F", "Gb", "G", "Ab", "A", "Bb", "B"];
        NAMES[self.root as usize]
    }
}

impl std::fmt::Display for MusicalKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.minor {
            write!(f, "{}m", self.note_name())
        } else {
            write!(f, "{}", self.note_name())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_major_keys() {
        assert_eq!(MusicalKey::parse("C"), Some(MusicalKey::new(0, false)));
        assert_eq!(MusicalKey::parse("G"), Some(MusicalKey::new(7, false)));
        assert_eq!(MusicalKey::parse("F#"), Some(MusicalKey::new(6, false)));
        assert_eq!(MusicalKey::parse("Bb"), Some(MusicalKey::new(10, false)));
        assert_eq!(MusicalKey::parse("Db"), Some(MusicalKey::new(1, false)));
    }

    #[test]
    fn test_parse_minor_keys() {
        assert_eq!(MusicalKey::parse("Am"), Some(MusicalKey::new(9, true)));
        assert_eq!(MusicalKey::parse("C#m"), Some(MusicalKey::new(1, true)));
        assert_eq!(MusicalKey::parse("Bbm"), Some(MusicalKey::new(10, true)));
        assert_eq!(MusicalKey::parse("E minor"), Some(MusicalKey::new(4, true)));
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert_eq!(MusicalKey::parse(""), None);
        assert_eq!(MusicalKey::parse("H"), None);
        assert_eq!(MusicalKey::parse("Cx"), None);
    }

    #[test]
    fn test_midi_map() {
        let midi = |k: &str| MusicalKey::parse(k).map(|k| k.midi_note());
        assert_eq!(midi("C"), Some(60));
        assert_eq!(midi("Db"), Some(61));
        assert_eq!(midi("C#"), Some(61));
        assert_eq!(midi("Gb"), Some(66));
        assert_eq!(midi("Bb"), Some(70));
        assert_eq!(midi("B"), Some(71));
    }

    #[test]
    fn test_playback_rate() {
        let c = MusicalKey::parse("C").unwrap();
        let a = MusicalKey::parse("A").unwrap();
        assert_eq!(c.playback_rate_from(&c), 1.0);
        assert!((a.playback_rate_from(&c) - 2f64.powf(9.0 / 12.0)).abs() < 1e-12);
        assert!((c.playback_rate_from(&a) - 2f64.powf(-9.0 / 12.0)).abs() < 1e-12);
    }

    #[test]
    fn test_display_uses_flats() {
        assert_eq!(MusicalKey::parse("A#").unwrap().to_string(), "Bb");
        assert_eq!(MusicalKey::parse("F#m").unwrap().to_string(), "Gbm");
    }
}
