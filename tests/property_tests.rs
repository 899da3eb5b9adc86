//! Property-based tests, complementing the unit and scenario tests with
//! randomized coverage of invariants the spec states for arbitrary inputs
//! rather than fixed examples.

use proptest::prelude::*;

mod rendezvous_packet_properties {
    use super::*;
    use gw_rendezvous::packet::{checksum, scramble};

    proptest! {
        /// Scrambling a session id against an encrypted prefix is its own
        /// inverse for any id and any prefix bytes (§4.3 "Scrambling").
        #[test]
        fn scramble_is_self_inverse(id in any::<u32>(), prefix in any::<[u8; 8]>()) {
            let scrambled = scramble(id, &prefix);
            prop_assert_eq!(scramble(scrambled, &prefix), id);
        }

        /// The one's-complement checksum is unaffected by how many extra
        /// `0xff` padding pairs trail the data, for arbitrary data and
        /// arbitrary (small) padding amounts (§4.3 "Checksum"; generalizes
        /// the fixed-vector unit test in `gw_rendezvous::packet`).
        #[test]
        fn checksum_ignores_0xff_padding_pair_count(
            data in prop::collection::vec(any::<u8>(), 0..256),
            extra_pairs_a in 0usize..32,
            extra_pairs_b in 0usize..32,
        ) {
            let mut a = data.clone();
            a.extend(std::iter::repeat(0xffu8).take(extra_pairs_a * 2));
            let mut b = data;
            b.extend(std::iter::repeat(0xffu8).take(extra_pairs_b * 2));
            prop_assert_eq!(checksum(&a), checksum(&b));
        }
    }
}

mod video_chunking_properties {
    use super::*;
    use gw_media::video_proprietary::{Chunker, Dechunker, VideoMessage};

    fn permute(mut items: Vec<Vec<u8>>, swap_entropy: &[u32]) -> Vec<Vec<u8>> {
        let n = items.len();
        for i in (1..n).rev() {
            let j = (swap_entropy[n - 1 - i] as usize) % (i + 1);
            items.swap(i, j);
        }
        items
    }

    proptest! {
        /// For any message body, fragments received in any permutation
        /// reassemble to the original message, provided every fragment is
        /// present (§8 "reassembly of the fragments in any permutation
        /// returns the original Message if and only if no fragment is
        /// missing"; generalizes scenario E5's fixed 2400-byte example).
        #[test]
        fn any_permutation_of_all_fragments_reassembles(
            body in prop::collection::vec(any::<u8>(), 0..6000),
            kind in any::<u32>(),
            time in any::<u32>(),
            swap_entropy in prop::collection::vec(any::<u32>(), 10),
        ) {
            let message = VideoMessage { kind, time, body };
            let mut chunker = Chunker::new();
            let fragments = chunker.chunk(&message);

            let shuffled = permute(fragments, &swap_entropy);

            let mut dechunker = Dechunker::new();
            let mut result = None;
            for fragment in &shuffled {
                result = dechunker.feed(fragment).unwrap();
            }
            prop_assert_eq!(result, Some(message));
        }

        /// Withholding any single fragment of a multi-fragment message
        /// never yields a reassembled message.
        #[test]
        fn withholding_any_fragment_never_emits(
            body in prop::collection::vec(any::<u8>(), 989..6000),
            kind in any::<u32>(),
            time in any::<u32>(),
            swap_entropy in prop::collection::vec(any::<u32>(), 10),
            drop_choice in any::<u32>(),
        ) {
            let message = VideoMessage { kind, time, body };
            let mut chunker = Chunker::new();
            let fragments = chunker.chunk(&message);
            prop_assume!(fragments.len() > 1);

            let drop_index = (drop_choice as usize) % fragments.len();
            let withheld: Vec<Vec<u8>> = fragments
                .into_iter()
                .enumerate()
                .filter(|(i, _)| *i != drop_index)
                .map(|(_, f)| f)
                .collect();
            let shuffled = permute(withheld, &swap_entropy);

            let mut dechunker = Dechunker::new();
            let mut result = None;
            for fragment in &shuffled {
                result = dechunker.feed(fragment).unwrap();
            }
            prop_assert_eq!(result, None);
        }
    }
}

mod capability_negotiation_properties {
    use super::*;
    use gw_media::capability::{negotiate, offer_for, Medium};

    const LABELS: &[&str] = &["wideband", "narrowband", "pcmu", "pcma", "dtmf", "h264", "default"];

    fn label_subset() -> impl Strategy<Value = Vec<&'static str>> {
        prop::collection::vec(prop::sample::select(LABELS), 0..LABELS.len())
    }

    proptest! {
        /// Whatever a negotiation picks, it was present in both sides'
        /// offers and belongs to the medium it's reported under (§4.7
        /// negotiation is an intersection, never an invention).
        #[test]
        fn negotiated_format_is_always_a_mutual_offer(
            local_labels in label_subset(),
            peer_labels in label_subset(),
        ) {
            let local = offer_for(&local_labels);
            let peer = offer_for(&peer_labels);
            let negotiated = negotiate(&local, &peer);

            if let Some(audio) = negotiated.audio {
                prop_assert_eq!(audio.medium, Medium::Audio);
                prop_assert!(local.iter().any(|f| f.name == audio.name));
                prop_assert!(peer.iter().any(|f| f.name == audio.name));
            }
            if let Some(video) = negotiated.video {
                prop_assert_eq!(video.medium, Medium::Video);
                prop_assert!(local.iter().any(|f| f.name == video.name));
                prop_assert!(peer.iter().any(|f| f.name == video.name));
            }
        }

        /// No shared audio format between the two offers always yields no
        /// negotiated audio, and likewise for video, independent of the
        /// other medium's outcome.
        #[test]
        fn disjoint_offers_never_negotiate_that_medium(
            local_labels in label_subset(),
            peer_labels in label_subset(),
        ) {
            let local = offer_for(&local_labels);
            let peer = offer_for(&peer_labels);
            let negotiated = negotiate(&local, &peer);

            let shares_audio = local.iter().any(|l| l.medium == Medium::Audio && peer.iter().any(|p| p.medium == Medium::Audio && p.name == l.name));
            let shares_video = local.iter().any(|l| l.medium == Medium::Video && peer.iter().any(|p| p.medium == Medium::Video && p.name == l.name));

            prop_assert_eq!(negotiated.audio.is_some(), shares_audio);
            prop_assert_eq!(negotiated.video.is_some(), shares_video);
        }
    }
}
