//! Response-batch post-processing before bytes hit the wire.

use std::collections::HashMap;

use imapd_types::{
    core::NonEmptyVec,
    fetch::FetchAttributeKey,
    response::{Data, Response},
};

/// Merges multiple `* n FETCH (...)` responses for the same sequence number
/// into one.
///
/// Attribute sets are unioned; when the same attribute appears twice the
/// later value wins (e.g. the flags reported by a STORE completion and the
/// flag delta the diff engine noticed are collapsed into one item). The
/// first occurrence keeps its position; everything else is untouched and
/// stays in order.
pub fn merge_fetch_responses(responses: Vec<Response>) -> Vec<Response> {
    let mut merged: Vec<Response> = Vec::with_capacity(responses.len());
    // seq → index into `merged`.
    let mut by_seq: HashMap<u32, usize> = HashMap::new();

    for response in responses {
        match response {
            Response::Data(Data::Fetch { seq, attributes }) => match by_seq.get(&seq) {
                None => {
                    by_seq.insert(seq, merged.len());
                    merged.push(Response::Data(Data::Fetch { seq, attributes }));
                }
                Some(&index) => {
                    let Response::Data(Data::Fetch {
                        attributes: existing,
                        ..
                    }) = &mut merged[index]
                    else {
                        unreachable!("by_seq only indexes FETCH responses");
                    };

                    let mut combined: Vec<(FetchAttributeKey, _)> = existing
                        .clone()
                        .into_iter()
                        .map(|value| (value.merge_key(), value))
                        .collect();

                    for value in attributes {
                        let key = value.merge_key();
                        match combined.iter_mut().find(|(existing, _)| *existing == key) {
                            Some(slot) => slot.1 = value,
                            None => combined.push((key, value)),
                        }
                    }

                    *existing = NonEmptyVec::try_from(
                        combined.into_iter().map(|(_, value)| value).collect::<Vec<_>>(),
                    )
                    // Merging two non-empty sets can't produce an empty one.
                    .unwrap();
                }
            },
            other => merged.push(other),
        }
    }

    merged
}

#[cfg(test)]
mod tests {
    use imapd_types::{
        fetch::FetchAttributeValue,
        flag::{Flag, FlagFetch},
    };

    use super::*;

    fn fetch(seq: u32, attributes: Vec<FetchAttributeValue>) -> Response {
        Response::Data(Data::Fetch {
            seq,
            attributes: NonEmptyVec::try_from(attributes).unwrap(),
        })
    }

    #[test]
    fn distinct_sequences_stay_separate() {
        let merged = merge_fetch_responses(vec![
            fetch(1, vec![FetchAttributeValue::Uid(10)]),
            fetch(2, vec![FetchAttributeValue::Uid(11)]),
        ]);

        assert_eq!(merged.len(), 2);
    }

    #[test]
    fn same_sequence_unions_attributes() {
        let merged = merge_fetch_responses(vec![
            fetch(1, vec![FetchAttributeValue::Uid(10)]),
            fetch(
                1,
                vec![FetchAttributeValue::Flags(vec![FlagFetch::Flag(Flag::Seen)])],
            ),
        ]);

        assert_eq!(merged.len(), 1);
        match &merged[0] {
            Response::Data(Data::Fetch { attributes, .. }) => {
                assert_eq!(attributes.len(), 2);
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn later_value_wins_per_attribute() {
        let merged = merge_fetch_responses(vec![
            fetch(
                3,
                vec![FetchAttributeValue::Flags(vec![FlagFetch::Flag(
                    Flag::Draft,
                )])],
            ),
            fetch(
                3,
                vec![FetchAttributeValue::Flags(vec![FlagFetch::Flag(Flag::Seen)])],
            ),
        ]);

        assert_eq!(merged.len(), 1);
        match &merged[0] {
            Response::Data(Data::Fetch { attributes, .. }) => {
                assert_eq!(attributes.len(), 1);
                assert_eq!(
                    attributes.as_slice()[0],
                    FetchAttributeValue::Flags(vec![FlagFetch::Flag(Flag::Seen)])
                );
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn non_fetch_responses_pass_through() {
        let merged = merge_fetch_responses(vec![
            Response::Data(Data::Exists(5)),
            fetch(1, vec![FetchAttributeValue::Uid(10)]),
            Response::Data(Data::Recent(1)),
        ]);

        assert_eq!(merged.len(), 3);
    }
}
