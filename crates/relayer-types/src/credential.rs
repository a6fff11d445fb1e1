use serde::Deserialize;

/// A secret used to authenticate against a destination, e.g. an API token or
/// a signing key handle.
///
/// In config files the value can be given inline or as `$ENV_VAR`, in which
/// case it is read from the environment while the config is deserialized.
#[derive(Clone, PartialEq, Eq)]
pub struct Credential(String);

impl Credential {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Exposes the secret value.
    pub fn expose(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.trim().is_empty()
    }
}

impl std::fmt::Debug for Credential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("Credential").finish()
    }
}

impl<'de> Deserialize<'de> for Credential {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        struct CredentialVisitor;
        impl<'de> serde::de::Visitor<'de> for CredentialVisitor {
            type Value = String;

            fn expecting(
                &self,
                formatter: &mut std::fmt::Formatter,
            ) -> std::fmt::Result {
                formatter.write_str(
                    "a credential string or an env var containing it ($NAME)",
                )
            }

            fn visit_str<E>(self, value: &str) -> Result<Self::Value, E>
            where
                E: serde::de::Error,
            {
                match value.strip_prefix('$') {
                    Some(var) => {
                        tracing::trace!("Reading {} from env", var);
                        std::env::var(var).map_err(|e| {
                            serde::de::Error::custom(format!(
                                "error while loading this env {var}: {e}",
                            ))
                        })
                    }
                    None => Ok(value.to_string()),
                }
            }
        }

        let secret = deserializer.deserialize_str(CredentialVisitor)?;
        Ok(Self(secret))
    }
}
