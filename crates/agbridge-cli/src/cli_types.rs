use clap::ValueEnum;

use agbridge_provider::KeySourcePreference;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum CliKeySource {
    Auto,
    Keychain,
    Derived,
}

impl From<CliKeySource> for KeySourcePreference {
    fn from(value: CliKeySource) -> Self {
        match value {
            CliKeySource::Auto => KeySourcePreference::Auto,
            CliKeySource::Keychain => KeySourcePreference::Keychain,
            CliKeySource::Derived => KeySourcePreference::Derived,
        }
    }
}
