//! Key estimation by pitch-class profile correlation
//!
//! Given a 12-element pitch-class weight vector, each of the 12 tonic
//! candidates is scored against the major and minor reference profiles by
//! rotating the profile to the tonic and taking the dot product; the best
//! correlation wins, ties broken by tonic index and then major over minor.
//! The result is then validated against an independently derived chord-root
//! histogram: when the selected key explains at least 60% of the observed
//! chord weight it stands; otherwise the key whose diatonic chord set
//! explains the largest weighted share is selected, with C major as the
//! fallback when no key explains any chord.

use chordwise_common::events::{ChordSegment, KeySignature, Mode};

/// Krumhansl-Schmuckler major key profile
const MAJOR_PROFILE: [f64; 12] = [
    6.35, 2.23, 3.48, 2.33, 4.38, 4.09, 2.52, 5.19, 2.39, 3.66, 2.29, 2.88,
];

/// Krumhansl-Schmuckler minor key profile
const MINOR_PROFILE: [f64; 12] = [
    6.33, 2.68, 3.52, 5.38, 2.60, 3.53, 2.54, 4.75, 3.98, 2.69, 3.34, 3.17,
];

/// Minimum explained chord-weight share for the profile estimate to stand
const CHORD_AGREEMENT_THRESHOLD: f64 = 0.6;

/// Triad quality as far as diatonic membership is concerned
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChordQuality {
    Major,
    Minor,
    Diminished,
}

/// A weighted chord observation: root pitch class, quality, weight
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ChordObservation {
    pub root: usize,
    pub quality: ChordQuality,
    pub weight: f64,
}

/// Parse a chord label such as "C", "F#m", "Bb", "Bdim" into root pitch
/// class and quality. Unrecognized labels yield None and are skipped by the
/// histogram builder.
pub fn parse_chord_label(label: &str) -> Option<(usize, ChordQuality)> {
    let mut chars = label.chars();
    let letter = chars.next()?;
    let mut root = match letter.to_ascii_uppercase() {
        'C' => 0,
        'D' => 2,
        'E' => 4,
        'F' => 5,
        'G' => 7,
        'A' => 9,
        'B' => 11,
        _ => return None,
    } as i32;

    let rest: String = chars.collect();
    let rest = if let Some(stripped) = rest.strip_prefix('#') {
        root += 1;
        stripped.to_string()
    } else if let Some(stripped) = rest.strip_prefix('b') {
        root -= 1;
        stripped.to_string()
    } else {
        rest
    };

    let quality = match rest.as_str() {
        "" | "maj" | "maj7" | "7" => ChordQuality::Major,
        "m" | "min" | "m7" => ChordQuality::Minor,
        "dim" | "dim7" => ChordQuality::Diminished,
        _ => return None,
    };

    Some((root.rem_euclid(12) as usize, quality))
}

/// Build a duration-weighted chord histogram from a chord timeline
pub fn chord_histogram(segments: &[ChordSegment]) -> Vec<ChordObservation> {
    segments
        .iter()
        .filter_map(|segment| {
            let weight = (segment.end_seconds - segment.start_seconds).max(0.0);
            if weight == 0.0 {
                return None;
            }
            parse_chord_label(&segment.chord).map(|(root, quality)| ChordObservation {
                root,
                quality,
                weight,
            })
        })
        .collect()
}

/// The seven diatonic triads of a key as (root pitch class, quality)
pub fn diatonic_chords(tonic: usize, mode: Mode) -> [(usize, ChordQuality); 7] {
    let degrees: [(usize, ChordQuality); 7] = match mode {
        Mode::Major => [
            (0, ChordQuality::Major),
            (2, ChordQuality::Minor),
            (4, ChordQuality::Minor),
            (5, ChordQuality::Major),
            (7, ChordQuality::Major),
            (9, ChordQuality::Minor),
            (11, ChordQuality::Diminished),
        ],
        Mode::Minor => [
            (0, ChordQuality::Minor),
            (2, ChordQuality::Diminished),
            (3, ChordQuality::Major),
            (5, ChordQuality::Minor),
            (7, ChordQuality::Minor),
            (8, ChordQuality::Major),
            (10, ChordQuality::Major),
        ],
    };
    degrees.map(|(interval, quality)| ((tonic + interval) % 12, quality))
}

fn correlation(profile: &[f64; 12], reference: &[f64; 12], tonic: usize) -> f64 {
    (0..12)
        .map(|degree| profile[(tonic + degree) % 12] * reference[degree])
        .sum()
}

/// Profile-only estimate: best-correlating (tonic, mode) pair.
///
/// Iteration order encodes the tie-break: tonics ascending, major before
/// minor, and only a strictly greater score displaces the current best.
pub fn correlate_profile(profile: &[f64; 12]) -> (usize, Mode) {
    let mut best = (0, Mode::Major);
    let mut best_score = f64::NEG_INFINITY;

    for tonic in 0..12 {
        for (mode, reference) in [(Mode::Major, &MAJOR_PROFILE), (Mode::Minor, &MINOR_PROFILE)] {
            let score = correlation(profile, reference, tonic);
            if score > best_score {
                best_score = score;
                best = (tonic, mode);
            }
        }
    }
    best
}

/// Weighted share of chord observations diatonic to the given key
pub fn explained_share(tonic: usize, mode: Mode, chords: &[ChordObservation]) -> f64 {
    let total: f64 = chords.iter().map(|c| c.weight).sum();
    if total == 0.0 {
        return 0.0;
    }
    let diatonic = diatonic_chords(tonic, mode);
    let explained: f64 = chords
        .iter()
        .filter(|c| diatonic.contains(&(c.root, c.quality)))
        .map(|c| c.weight)
        .sum();
    explained / total
}

/// Full key estimation: profile correlation validated against the chord
/// histogram, with the best-explaining-key search and C-major fallback.
///
/// An empty histogram leaves the profile estimate unchallenged.
pub fn estimate_key(profile: &[f64; 12], chords: &[ChordObservation]) -> KeySignature {
    let (tonic, mode) = correlate_profile(profile);

    if chords.is_empty() {
        return KeySignature::from_pitch_class(tonic, mode);
    }

    if explained_share(tonic, mode, chords) >= CHORD_AGREEMENT_THRESHOLD {
        return KeySignature::from_pitch_class(tonic, mode);
    }

    // The profile estimate disagrees with the chord evidence; search every
    // key for the diatonic set explaining the largest weighted share.
    let mut best = None;
    let mut best_share = 0.0;
    for candidate_tonic in 0..12 {
        for candidate_mode in [Mode::Major, Mode::Minor] {
            let share = explained_share(candidate_tonic, candidate_mode, chords);
            if share > best_share {
                best_share = share;
                best = Some((candidate_tonic, candidate_mode));
            }
        }
    }

    match best {
        Some((best_tonic, best_mode)) => KeySignature::from_pitch_class(best_tonic, best_mode),
        // No key explains any chord
        None => KeySignature::from_pitch_class(0, Mode::Major),
    }
}
