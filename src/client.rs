use rusoto_core::credential::StaticProvider;
use rusoto_core::{HttpClient, Region};

use crate::config::ClientOptions;
use crate::error::SinkError;

pub(crate) fn region(options: &ClientOptions) -> Result<Region, SinkError> {
    match options.region() {
        Some(name) => name
            .parse::<Region>()
            .map_err(|err| SinkError::Config(format!("region {:?}: {}", name, err))),
        None => Ok(Region::default()),
    }
}

/// Builds a rusoto client honoring explicit credentials and region
/// overrides. `with_static` is used when keys are configured, `with_default`
/// otherwise, e.g. `CloudWatchLogsClient::new_with` and
/// `CloudWatchLogsClient::new`.
pub(crate) fn build<T, S, D>(
    options: &ClientOptions,
    with_static: S,
    with_default: D,
) -> Result<T, SinkError>
where
    S: FnOnce(HttpClient, StaticProvider, Region) -> T,
    D: FnOnce(Region) -> T,
{
    let region = region(options)?;
    match options.credentials() {
        Some((access_key, secret_key)) => {
            let dispatcher =
                HttpClient::new().map_err(|err| SinkError::Transport(err.to_string()))?;
            let credentials =
                StaticProvider::new_minimal(access_key.to_string(), secret_key.to_string());
            Ok(with_static(dispatcher, credentials, region))
        }
        None => Ok(with_default(region)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_region_override() {
        let options = ClientOptions {
            region: Some("eu-west-1".to_string()),
            ..Default::default()
        };
        assert_eq!(region(&options).unwrap(), Region::EuWest1);
    }

    #[test]
    fn test_invalid_region() {
        let options = ClientOptions {
            region: Some("mars-north-1".to_string()),
            ..Default::default()
        };
        assert!(matches!(region(&options), Err(SinkError::Config(_))));
    }

    #[test]
    fn test_build_picks_provider() {
        let options = ClientOptions {
            region: Some("us-east-2".to_string()),
            ..Default::default()
        };
        let picked = build(&options, |_, _, _| "static", |_| "default").unwrap();
        assert_eq!(picked, "default");
    }
}
