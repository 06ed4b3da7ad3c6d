//! Value types shared by the binaries' environment configuration.
use std::str::FromStr;
use std::time;

#[derive(Debug, Clone, Copy)]
pub struct EnvMsDuration(pub time::Duration);

#[derive(Debug, PartialEq, Eq)]
pub struct ParseEnvMsDurationError;

impl FromStr for EnvMsDuration {
    type Err = ParseEnvMsDurationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let ms = s.parse::<u64>().map_err(|_| ParseEnvMsDurationError)?;

        Ok(EnvMsDuration(time::Duration::from_millis(ms)))
    }
}

impl std::fmt::Display for ParseEnvMsDurationError {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "expected a whole number of milliseconds")
    }
}

impl std::error::Error for ParseEnvMsDurationError {}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NonEmptyString(pub String);

impl NonEmptyString {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

#[derive(Debug, PartialEq, Eq)]
pub struct StringIsEmptyError;

impl std::fmt::Display for StringIsEmptyError {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "value must not be empty")
    }
}

impl std::error::Error for StringIsEmptyError {}

impl FromStr for NonEmptyString {
    type Err = StringIsEmptyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.is_empty() {
            Err(StringIsEmptyError)
        } else {
            Ok(NonEmptyString(s.to_owned()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ms_duration_parses_whole_milliseconds() {
        let duration: EnvMsDuration = "5000".parse().unwrap();
        assert_eq!(duration.0, time::Duration::from_secs(5));
        assert_eq!("5s".parse::<EnvMsDuration>().unwrap_err(), ParseEnvMsDurationError);
    }

    #[test]
    fn test_non_empty_string_rejects_blank_values() {
        assert_eq!("json".parse::<NonEmptyString>().unwrap().as_str(), "json");
        assert_eq!("  ".parse::<NonEmptyString>().unwrap_err(), StringIsEmptyError);
    }
}
