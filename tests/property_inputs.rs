// tests/property_inputs.rs

use std::collections::BTreeMap;
use std::path::PathBuf;

use execworker::config::WorkerConfig;
use execworker::exec::ResponsePack;
use execworker::job::{
    IdentityContext, JobDescriptor, NumericField, TargetUser, build_command, to_integer,
};
use execworker::types::{ChunkPolicy, StreamKind};
use execworker_test_utils::builders::JobBuilder;
use proptest::prelude::*;

fn identity() -> IdentityContext {
    IdentityContext {
        euid: 1000,
        ruid: 1000,
        target: TargetUser {
            name: "builder".to_string(),
            uid: 1000,
            gid: 1000,
            home: PathBuf::from("/home/builder"),
            shell: PathBuf::from("/bin/sh"),
        },
    }
}

fn arg_strategy() -> impl Strategy<Value = Vec<String>> {
    proptest::collection::vec("[^\\x00]{0,12}", 0..6)
}

// Feed `text` through a pack in pieces of `piece` bytes, draining whatever
// becomes ready, and return every message's stdout in order.
fn pack_messages(
    text: &str,
    policy: ChunkPolicy,
    chunk_size: usize,
    piece: usize,
) -> Vec<String> {
    let mut pack = ResponsePack::new(policy, chunk_size);
    let mut messages = Vec::new();
    for bytes in text.as_bytes().chunks(piece) {
        pack.append(StreamKind::Stdout, bytes);
        while pack.ready() {
            messages.push(pack.take_ready().stdout);
        }
    }
    messages.push(pack.take_all().stdout);
    messages
}

proptest! {
    #[test]
    fn to_integer_accepts_any_u64_with_surrounding_space(n in any::<u64>(), pad in " {0,3}") {
        let text = format!("{pad}{n}{pad}");
        prop_assert_eq!(to_integer("timeout", &text).unwrap(), n);
    }

    #[test]
    fn to_integer_rejects_anything_with_a_non_digit(s in "[0-9]{0,4}[^0-9\\s]+[0-9]{0,4}") {
        prop_assert!(to_integer("timeout", &s).is_err());
    }

    #[test]
    fn numeric_field_ints_and_text_agree(n in 0i64..=i64::MAX) {
        let as_int = NumericField::Int(n).coerce("request_seq").unwrap();
        let as_text = NumericField::Text(n.to_string()).coerce("request_seq").unwrap();
        prop_assert_eq!(as_int, as_text);
    }

    #[test]
    fn direct_args_are_appended_verbatim(args in arg_strategy()) {
        let config = WorkerConfig::default();
        let mut builder = JobBuilder::new("p", "printf '%s'");
        for arg in args.iter() {
            builder = builder.arg(arg);
        }
        let job = JobDescriptor::from_raw(builder.build(), &config.worker).unwrap();
        let spec = build_command(&job, &identity(), PathBuf::from("/tmp"), &config).unwrap();

        prop_assert_eq!(spec.program.as_str(), "printf");
        prop_assert_eq!(&spec.args[0], "%s");
        prop_assert_eq!(&spec.args[1..], &args[..]);
    }

    #[test]
    fn shell_args_become_positional_parameters(args in arg_strategy()) {
        let config = WorkerConfig::default();
        let mut builder = JobBuilder::new("p", "echo \"$@\"").shell(true);
        for arg in args.iter() {
            builder = builder.arg(arg);
        }
        let job = JobDescriptor::from_raw(builder.build(), &config.worker).unwrap();
        let spec = build_command(&job, &identity(), PathBuf::from("/tmp"), &config).unwrap();

        prop_assert_eq!(spec.program.as_str(), "/bin/sh");
        prop_assert_eq!(&spec.args[0], "-c");
        prop_assert_eq!(&spec.args[1], "echo \"$@\"");
        prop_assert_eq!(&spec.args[2], "sh");
        prop_assert_eq!(&spec.args[3..], &args[..]);
    }

    #[test]
    fn child_env_is_fixed_base_plus_job_env(value in "[^\\x00]{0,20}") {
        let config = WorkerConfig::default();
        let raw = JobBuilder::new("p", "env").env("JOB_VALUE", &value).build();
        let job = JobDescriptor::from_raw(raw, &config.worker).unwrap();
        let spec = build_command(&job, &identity(), PathBuf::from("/tmp"), &config).unwrap();

        let mut expected = BTreeMap::new();
        expected.insert("HOME".to_string(), "/home/builder".to_string());
        expected.insert("JOB_VALUE".to_string(), value.clone());
        expected.insert("LOGNAME".to_string(), "builder".to_string());
        expected.insert("PATH".to_string(), config.worker.default_path.clone());
        expected.insert("SHELL".to_string(), "/bin/sh".to_string());
        expected.insert("USER".to_string(), "builder".to_string());
        prop_assert_eq!(spec.env, expected);
    }

    #[test]
    fn pack_preserves_text_and_never_splits_characters(
        text in "\\PC{0,64}",
        line_policy in any::<bool>(),
        chunk_size in 1usize..16,
        piece in 1usize..8,
    ) {
        prop_assume!(!text.contains('\u{FFFD}'));
        let policy = if line_policy { ChunkPolicy::Line } else { ChunkPolicy::Size };

        let messages = pack_messages(&text, policy, chunk_size, piece);

        for msg in messages.iter() {
            prop_assert!(!msg.contains('\u{FFFD}'), "split character in {:?}", msg);
        }
        prop_assert_eq!(messages.concat(), text);
    }

    #[test]
    fn line_policy_only_sends_whole_lines_early(
        lines in proptest::collection::vec("[a-z]{0,5}", 1..8),
        piece in 1usize..8,
    ) {
        let text = lines.join("\n");
        // Chunk larger than the text: every early message ends a line.
        let messages = pack_messages(&text, ChunkPolicy::Line, 1024, piece);

        let (tail, early) = messages.split_last().unwrap();
        for msg in early {
            prop_assert!(msg.ends_with('\n'));
        }
        prop_assert!(!tail.contains('\n'));
    }
}
