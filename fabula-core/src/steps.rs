//! Step classification for streamed narrative text.
//!
//! The narrator model emits plain prose interleaved with bracket markers.
//! [`classify`] turns the full text produced so far into an ordered list of
//! typed [`NarrativeStep`]s. It is stateless and deterministic: the same
//! buffer always classifies to the same steps, and a grown buffer only
//! appends steps (or extends the final one), which is what lets the
//! incremental emitter rerun it on every chunk.
//!
//! Marker grammar:
//!
//! ```text
//! [NARRATION: text]
//! [DIALOGUE: speaker_id, "utterance"]
//! [HINT: text]            followed by zero or more delta markers:
//!   [STAT: name, +2] [RELATIONSHIP: npc_id, -1] [ITEM: item_id, +1] [UNLOCK: scene_id]
//! [CHOICE: title] body text [OPTION: text]... [END_CHOICE]
//! [NEW_MISSION]           story-mission intent signal, not a step
//! ```
//!
//! Unrecognized bracket content is skipped, never an error. A buffer that
//! ends inside an unclosed marker or an unterminated choice block omits
//! that trailing element until more text arrives.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Upper bound on a single marker's length. An unclosed bracket that grows
/// past this is runaway output, not a marker still streaming in.
pub const MAX_MARKER_LEN: usize = 16 * 1024;

/// Errors from classification.
#[derive(Debug, Error)]
pub enum ClassifyError {
    #[error("unterminated marker at byte {offset} exceeds {MAX_MARKER_LEN} bytes")]
    RunawayMarker { offset: usize },
}

/// One classified unit of story output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum NarrativeStep {
    Narration {
        text: String,
    },
    Dialogue {
        speaker_id: String,
        text: String,
    },
    Hint {
        text: String,
        deltas: Vec<HintDelta>,
    },
    Choice {
        title: String,
        body: String,
        options: Vec<String>,
    },
}

/// A typed state change attached to a hint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum HintDelta {
    Stat { name: String, delta: i64 },
    Relationship { npc_id: String, delta: i64 },
    Item { item_id: String, delta: i64 },
    UnlockScene { scene_id: String },
}

/// Classify the full text produced so far into ordered steps.
///
/// Reparses from scratch each call; idempotent. The only error is the
/// runaway-marker guard, on which callers degrade to raw text.
pub fn classify(text: &str) -> Result<Vec<NarrativeStep>, ClassifyError> {
    let mut steps = Vec::new();
    // Index into `steps` of a hint still accepting delta markers.
    let mut open_hint: Option<usize> = None;
    let mut choice: Option<ChoiceBuilder> = None;
    let mut pos = 0;

    while let Some(rel) = text[pos..].find('[') {
        let start = pos + rel;

        // Interstitial text belongs to a choice body until its first option.
        if let Some(ref mut c) = choice {
            if !c.seen_option {
                c.body.push_str(&text[pos..start]);
            }
        }

        let Some(rel_end) = text[start..].find(']') else {
            // Still streaming the marker, unless it can no longer be one.
            if text.len() - start > MAX_MARKER_LEN {
                return Err(ClassifyError::RunawayMarker { offset: start });
            }
            return Ok(steps);
        };
        let end = start + rel_end;
        let content = &text[start + 1..end];
        pos = end + 1;

        let (tag, rest) = match content.split_once(':') {
            Some((tag, rest)) => (tag.trim(), rest.trim()),
            None => (content.trim(), ""),
        };

        if choice.is_some() {
            // Inside a choice block only its own markers are recognized.
            match tag {
                "OPTION" => {
                    if let Some(c) = choice.as_mut() {
                        c.seen_option = true;
                        c.options.push(rest.to_string());
                    }
                }
                "END_CHOICE" => {
                    if let Some(c) = choice.take() {
                        steps.push(NarrativeStep::Choice {
                            title: c.title,
                            body: c.body.trim().to_string(),
                            options: c.options,
                        });
                    }
                }
                _ => {}
            }
            continue;
        }

        match tag {
            "NARRATION" => {
                open_hint = None;
                steps.push(NarrativeStep::Narration {
                    text: rest.to_string(),
                });
            }
            "DIALOGUE" => {
                open_hint = None;
                if let Some((speaker, utterance)) = rest.split_once(',') {
                    steps.push(NarrativeStep::Dialogue {
                        speaker_id: speaker.trim().to_string(),
                        text: unquote(utterance.trim()).to_string(),
                    });
                }
                // A dialogue marker without a speaker is malformed; skip it.
            }
            "HINT" => {
                steps.push(NarrativeStep::Hint {
                    text: rest.to_string(),
                    deltas: Vec::new(),
                });
                open_hint = Some(steps.len() - 1);
            }
            "STAT" | "RELATIONSHIP" | "ITEM" | "UNLOCK" => {
                if let (Some(idx), Some(delta)) = (open_hint, parse_delta(tag, rest)) {
                    if let NarrativeStep::Hint { deltas, .. } = &mut steps[idx] {
                        deltas.push(delta);
                    }
                }
            }
            "CHOICE" => {
                open_hint = None;
                choice = Some(ChoiceBuilder {
                    title: rest.to_string(),
                    body: String::new(),
                    options: Vec::new(),
                    seen_option: false,
                });
            }
            // [NEW_MISSION] and anything else: not a step.
            _ => {}
        }
    }

    // An unterminated choice block is the trailing incomplete element;
    // omit it until END_CHOICE arrives.
    Ok(steps)
}

/// Whether the buffer ends on a clean marker boundary (ignoring trailing
/// whitespace). The incremental emitter withholds the final step otherwise.
pub fn ends_on_boundary(text: &str) -> bool {
    text.trim_end().ends_with(']')
}

/// Whether the text carries the story-mission intent signal.
pub fn contains_mission_marker(text: &str) -> bool {
    text.contains("[NEW_MISSION]")
}

struct ChoiceBuilder {
    title: String,
    body: String,
    options: Vec<String>,
    seen_option: bool,
}

fn unquote(s: &str) -> &str {
    s.strip_prefix('"')
        .and_then(|s| s.strip_suffix('"'))
        .unwrap_or(s)
}

fn parse_delta(tag: &str, rest: &str) -> Option<HintDelta> {
    match tag {
        "UNLOCK" => {
            let scene_id = rest.trim();
            if scene_id.is_empty() {
                None
            } else {
                Some(HintDelta::UnlockScene {
                    scene_id: scene_id.to_string(),
                })
            }
        }
        _ => {
            let (name, amount) = rest.split_once(',')?;
            let delta: i64 = amount.trim().trim_start_matches('+').parse().ok()?;
            let name = name.trim().to_string();
            match tag {
                "STAT" => Some(HintDelta::Stat { name, delta }),
                "RELATIONSHIP" => Some(HintDelta::Relationship {
                    npc_id: name,
                    delta,
                }),
                "ITEM" => Some(HintDelta::Item {
                    item_id: name,
                    delta,
                }),
                _ => None,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_single_narration() {
        let steps = classify("[NARRATION: It is dawn.]").unwrap();
        assert_eq!(
            steps,
            vec![NarrativeStep::Narration {
                text: "It is dawn.".to_string()
            }]
        );
    }

    #[test]
    fn test_three_step_example() {
        let text = "[NARRATION: It is dawn.][DIALOGUE: npc_1, \"Hello.\"][CHOICE: Pick]\nGo?\n[OPTION: Yes]\n[OPTION: No]\n[END_CHOICE]";
        let steps = classify(text).unwrap();

        assert_eq!(steps.len(), 3);
        assert_eq!(
            steps[0],
            NarrativeStep::Narration {
                text: "It is dawn.".to_string()
            }
        );
        assert_eq!(
            steps[1],
            NarrativeStep::Dialogue {
                speaker_id: "npc_1".to_string(),
                text: "Hello.".to_string()
            }
        );
        assert_eq!(
            steps[2],
            NarrativeStep::Choice {
                title: "Pick".to_string(),
                body: "Go?".to_string(),
                options: vec!["Yes".to_string(), "No".to_string()],
            }
        );
    }

    #[test]
    fn test_hint_with_deltas() {
        let text = "[HINT: You feel braver.][STAT: courage, +2][ITEM: old_coin, +1][UNLOCK: crypt]";
        let steps = classify(text).unwrap();

        assert_eq!(
            steps,
            vec![NarrativeStep::Hint {
                text: "You feel braver.".to_string(),
                deltas: vec![
                    HintDelta::Stat {
                        name: "courage".to_string(),
                        delta: 2
                    },
                    HintDelta::Item {
                        item_id: "old_coin".to_string(),
                        delta: 1
                    },
                    HintDelta::UnlockScene {
                        scene_id: "crypt".to_string()
                    },
                ],
            }]
        );
    }

    #[test]
    fn test_delta_does_not_cross_steps() {
        let text = "[HINT: A clue.][NARRATION: Later.][STAT: courage, +1]";
        let steps = classify(text).unwrap();

        assert_eq!(steps.len(), 2);
        let NarrativeStep::Hint { deltas, .. } = &steps[0] else {
            panic!("expected hint");
        };
        assert!(deltas.is_empty(), "delta after narration must not attach");
    }

    #[test]
    fn test_unrecognized_marker_ignored() {
        let steps = classify("[FANFARE: trumpets][NARRATION: Hello.]").unwrap();
        assert_eq!(steps.len(), 1);
    }

    #[test]
    fn test_malformed_dialogue_skipped() {
        let steps = classify("[DIALOGUE: no comma here]").unwrap();
        assert!(steps.is_empty());
    }

    #[test]
    fn test_malformed_delta_skipped() {
        let steps = classify("[HINT: x][STAT: courage, lots]").unwrap();
        let NarrativeStep::Hint { deltas, .. } = &steps[0] else {
            panic!("expected hint");
        };
        assert!(deltas.is_empty());
    }

    #[test]
    fn test_relationship_negative_delta() {
        let steps = classify("[HINT: She frowns.][RELATIONSHIP: npc_2, -3]").unwrap();
        let NarrativeStep::Hint { deltas, .. } = &steps[0] else {
            panic!("expected hint");
        };
        assert_eq!(
            deltas[0],
            HintDelta::Relationship {
                npc_id: "npc_2".to_string(),
                delta: -3
            }
        );
    }

    #[test]
    fn test_trailing_unclosed_marker_omitted() {
        let steps = classify("[NARRATION: Done.][DIALOGUE: npc_1, \"par").unwrap();
        assert_eq!(steps.len(), 1);
    }

    #[test]
    fn test_unterminated_choice_omitted() {
        let steps = classify("[CHOICE: Pick]\nGo?\n[OPTION: Yes]").unwrap();
        assert!(steps.is_empty());
    }

    #[test]
    fn test_dialogue_without_quotes() {
        let steps = classify("[DIALOGUE: npc_1, Hello there]").unwrap();
        assert_eq!(
            steps[0],
            NarrativeStep::Dialogue {
                speaker_id: "npc_1".to_string(),
                text: "Hello there".to_string()
            }
        );
    }

    #[test]
    fn test_idempotent() {
        let text = "[NARRATION: A.][HINT: B.][STAT: luck, +1][CHOICE: C]body[OPTION: x][END_CHOICE]";
        assert_eq!(classify(text).unwrap(), classify(text).unwrap());
    }

    #[test]
    fn test_monotonic_over_prefixes() {
        let text = "[NARRATION: It is dawn.][DIALOGUE: npc_1, \"Hello.\"][HINT: A chill.][STAT: courage, +1][CHOICE: Pick]\nGo?\n[OPTION: Yes]\n[OPTION: No]\n[END_CHOICE]";
        let full = classify(text).unwrap();

        for cut in (0..=text.len()).filter(|i| text.is_char_boundary(*i)) {
            let prefix_steps = classify(&text[..cut]).unwrap();
            assert!(prefix_steps.len() <= full.len());
            // Every step but the last must already be final.
            for (i, step) in prefix_steps.iter().enumerate() {
                if i + 1 < prefix_steps.len() {
                    assert_eq!(step, &full[i], "non-final step changed at cut {cut}");
                }
            }
        }
    }

    #[test]
    fn test_runaway_marker_errors() {
        let mut text = String::from("[NARRATION: ok.][HINT: ");
        text.push_str(&"x".repeat(MAX_MARKER_LEN + 1));
        let err = classify(&text).unwrap_err();
        assert!(matches!(err, ClassifyError::RunawayMarker { .. }));
    }

    #[test]
    fn test_ends_on_boundary() {
        assert!(ends_on_boundary("[NARRATION: done.]"));
        assert!(ends_on_boundary("[END_CHOICE]\n  "));
        assert!(!ends_on_boundary("[NARRATION: done.] and then"));
        assert!(!ends_on_boundary(""));
    }

    #[test]
    fn test_mission_marker_detection() {
        assert!(contains_mission_marker("The plot thickens. [NEW_MISSION]"));
        assert!(!contains_mission_marker("[NEW_MISSIO"));
        // The classifier itself ignores the marker.
        assert!(classify("[NEW_MISSION]").unwrap().is_empty());
    }

    #[test]
    fn test_bare_text_outside_markers_not_a_step() {
        let steps = classify("The model rambles here. [NARRATION: A step.] more rambling").unwrap();
        assert_eq!(steps.len(), 1);
    }

    #[test]
    fn test_serde_round_trip_tagged() {
        let step = NarrativeStep::Dialogue {
            speaker_id: "npc_1".to_string(),
            text: "Hi.".to_string(),
        };
        let json = serde_json::to_value(&step).unwrap();
        assert_eq!(json["type"], "dialogue");
        assert_eq!(json["speaker_id"], "npc_1");
    }
}
