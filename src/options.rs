use crate::error::{ReplayError, ReplayResult};

/// Typed view of the argument string saved in a trace's `"replay-options"`
/// annotation.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ReplayOptions {
    /// Number of upcoming frames to buffer in RAM before replay begins.
    /// Zero disables preloading.
    pub preload_frames: u64,
}

impl ReplayOptions {
    /// Parses whitespace-tokenized arguments as produced by
    /// [`crate::annotation::get_trace_replay_options`].
    pub fn parse(args: &[String]) -> ReplayResult<Self> {
        let mut options = Self::default();
        let mut iter = args.iter();
        while let Some(arg) = iter.next() {
            match arg.as_str() {
                "--preload-frames" => {
                    let value = iter.next().ok_or_else(|| {
                        ReplayError::InvalidOptions(
                            "--preload-frames requires a frame count".to_string(),
                        )
                    })?;
                    options.preload_frames = value.parse().map_err(|_| {
                        ReplayError::InvalidOptions(format!(
                            "--preload-frames: not a frame count: {value}"
                        ))
                    })?;
                }
                other => {
                    return Err(ReplayError::InvalidOptions(format!(
                        "unrecognized replay option: {other}"
                    )));
                }
            }
        }
        Ok(options)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(raw: &str) -> Vec<String> {
        raw.split_whitespace().map(str::to_string).collect()
    }

    #[test]
    fn empty_arguments_yield_defaults() {
        assert_eq!(ReplayOptions::parse(&[]).unwrap(), ReplayOptions::default());
    }

    #[test]
    fn preload_frames_is_parsed() {
        let options = ReplayOptions::parse(&args("--preload-frames 3")).unwrap();
        assert_eq!(options.preload_frames, 3);
    }

    #[test]
    fn unknown_and_malformed_options_are_rejected() {
        assert!(matches!(
            ReplayOptions::parse(&args("--frobnicate")),
            Err(ReplayError::InvalidOptions(_))
        ));
        assert!(matches!(
            ReplayOptions::parse(&args("--preload-frames")),
            Err(ReplayError::InvalidOptions(_))
        ));
        assert!(matches!(
            ReplayOptions::parse(&args("--preload-frames many")),
            Err(ReplayError::InvalidOptions(_))
        ));
    }
}
