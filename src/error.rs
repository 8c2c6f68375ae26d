//! Error taxonomy for plugin loading.
//!
//! Almost every failure is routed to [`crate::plugins::Host::report`] and
//! loading carries on with the next declaration. Only [`FatalError`] escapes
//! a load pass.

/// Category of a reported plugin failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Missing or invalid attribute, unresolvable path.
    Configuration,
    /// Declared name could not be resolved or linked.
    ClassResolution,
    /// Downloaded file does not match its declared digest.
    Integrity,
    /// Network or file failure while fetching a plugin path entry.
    Io,
    /// Anything else raised while constructing or customizing a plugin.
    Unexpected,
}

/// A diagnostic produced while loading plugins.
#[derive(Debug, thiserror::Error)]
pub enum PluginError {
    /// Missing or invalid attribute, unresolved path.
    #[error("{message}")]
    Configuration {
        /// Description of the problem.
        message: String,
    },

    /// The declared name could not be resolved.
    #[error("failed to load plugin {class_name};{attrs}: {reason}")]
    ClassResolution {
        /// Declared name with the duplicate marker removed.
        class_name: String,
        /// Declaration attributes, rendered.
        attrs: String,
        /// Why resolution failed.
        reason: String,
    },

    /// Digest mismatch on a downloaded plugin path entry.
    #[error("plugin path: {path}, specified url {url} and a {algorithm} but the file does not match")]
    Integrity {
        /// Declared plugin path entry.
        path: String,
        /// Source URL.
        url: String,
        /// Digest attribute name.
        algorithm: &'static str,
    },

    /// Download of a plugin path entry failed.
    #[error("failed to download plugin {path} from {url}: {source:#}")]
    Io {
        /// Declared plugin path entry.
        path: String,
        /// Source URL.
        url: String,
        /// Underlying failure.
        #[source]
        source: anyhow::Error,
    },

    /// Unexpected failure constructing, customizing or notifying a plugin.
    #[error("{context}: {source:#}")]
    Unexpected {
        /// What was being done.
        context: String,
        /// Underlying failure.
        #[source]
        source: anyhow::Error,
    },
}

impl PluginError {
    /// Shorthand for a [`PluginError::Configuration`].
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// The category of this diagnostic.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Configuration { .. } => ErrorKind::Configuration,
            Self::ClassResolution { .. } => ErrorKind::ClassResolution,
            Self::Integrity { .. } => ErrorKind::Integrity,
            Self::Io { .. } => ErrorKind::Io,
            Self::Unexpected { .. } => ErrorKind::Unexpected,
        }
    }
}

/// Non-recoverable failure. Aborts the whole load pass.
///
/// Plugin factories and hosts signal it by returning it inside an
/// [`anyhow::Error`]; the loader re-raises it unchanged.
#[derive(Debug, thiserror::Error)]
#[error("fatal error loading plugin {class_name}: {message}")]
pub struct FatalError {
    /// Declaration being processed when the failure occurred.
    pub class_name: String,
    /// Description of the failure.
    pub message: String,
}

/// A plugin's code resolved but one of its own dependencies did not.
///
/// Treated like an unresolvable name: suppressed during the bootstrap pass
/// and for declarations carrying a `command` list.
#[derive(Debug, thiserror::Error)]
#[error("linkage error: {0}")]
pub struct LinkageError(pub String);
