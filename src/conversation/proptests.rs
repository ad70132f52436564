//! Property tests for the turn state machine

use super::*;
use proptest::prelude::*;

/// Drive one full successful turn through the transition function, applying
/// transcript effects the way the runtime does.
fn run_successful_turn(
    phase: Phase,
    transcript: &mut Transcript,
    text: &str,
    fragments: &[String],
    suggestions: Vec<String>,
) -> Phase {
    let mut phase = phase;

    let events = std::iter::once(TurnEvent::Submit {
        text: text.to_string(),
        suggested: false,
    })
    .chain(std::iter::once(TurnEvent::StreamOpened))
    .chain(fragments.iter().map(|f| TurnEvent::Fragment { text: f.clone() }))
    .chain([
        TurnEvent::StreamClosed,
        TurnEvent::SuggestionsReady {
            questions: suggestions,
        },
    ]);

    for event in events {
        let result = transition(&phase, event).expect("valid turn sequence");
        for effect in &result.effects {
            effect.apply(transcript);
        }
        phase = result.next;
    }

    phase
}

fn fragment_strategy() -> impl Strategy<Value = Vec<String>> {
    proptest::collection::vec(".{0,20}", 0..12)
}

proptest! {
    // Concatenating fragments in arrival order must equal the final model
    // turn exactly: nothing dropped, reordered, or duplicated.
    #[test]
    fn fragments_concatenate_into_model_turn(fragments in fragment_strategy()) {
        let mut transcript = Transcript::seeded("Q", "A");
        run_successful_turn(
            Phase::idle(),
            &mut transcript,
            "왜 그런가요?",
            &fragments,
            vec![],
        );

        let expected: String = fragments.concat();
        prop_assert_eq!(transcript.last().unwrap().role, Role::Model);
        prop_assert_eq!(transcript.last().unwrap().content.clone(), expected);
    }

    // Roles strictly alternate starting with user, for any number of turns.
    #[test]
    fn roles_alternate_starting_with_user(
        turns in proptest::collection::vec(fragment_strategy(), 0..5)
    ) {
        let mut transcript = Transcript::seeded("Q", "A");
        let mut phase = Phase::idle();

        for fragments in &turns {
            phase = run_successful_turn(
                phase,
                &mut transcript,
                "질문입니다",
                fragments,
                vec![],
            );
        }

        for (i, turn) in transcript.turns().iter().enumerate() {
            let expected = if i % 2 == 0 { Role::User } else { Role::Model };
            prop_assert_eq!(turn.role, expected);
        }
    }

    // A second submission while busy must leave the transcript unchanged.
    #[test]
    fn busy_submission_is_a_no_op(text in ".{1,30}") {
        let mut transcript = Transcript::seeded("Q", "A");
        let phase = {
            let result = transition(
                &Phase::idle(),
                TurnEvent::Submit { text: "첫 질문".to_string(), suggested: false },
            ).unwrap();
            for effect in &result.effects {
                effect.apply(&mut transcript);
            }
            result.next
        };

        let before = transcript.clone();
        let rejected = transition(
            &phase,
            TurnEvent::Submit { text, suggested: false },
        );

        prop_assert!(rejected.is_err());
        prop_assert_eq!(&transcript, &before);
    }

    // The suggestion set after a completed turn has length 0, 1, or 2 even
    // when the generator over-produces, and is gone the moment a new turn
    // is submitted.
    #[test]
    fn suggestion_set_bounded_and_cleared(
        questions in proptest::collection::vec(".{1,20}", 0..6)
    ) {
        let mut transcript = Transcript::seeded("Q", "A");
        let phase = run_successful_turn(
            Phase::idle(),
            &mut transcript,
            "질문",
            &["답".to_string()],
            questions,
        );

        prop_assert!(phase.suggestions().len() <= 2);

        let next = transition(
            &phase,
            TurnEvent::Submit { text: "다음 질문".to_string(), suggested: false },
        ).unwrap();
        prop_assert_eq!(next.next.suggestions(), &[] as &[String]);
    }
}
