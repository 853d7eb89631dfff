use async_trait::async_trait;

use crate::configuration::types::ServiceMapping;
use crate::error_handling::types::SyncError;

/// Answer to a preview/match request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PreviewOutcome {
    /// The platform already tracks an endpoint matching the example path.
    Matched {
        endpoint_id: Option<String>,
        template: Option<String>,
    },
    NoMatch,
}

/// An application already present on the platform.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApplicationRef {
    pub application_id: String,
    pub instance_ids: Vec<String>,
}

/// The remote API-inventory platform.
///
/// Every call is a single attempt; retrying is the caller's business.
#[async_trait]
pub trait RemotePlatform: Send + Sync {
    async fn preview_endpoint(
        &self,
        mapping: &ServiceMapping,
        method: &str,
        path: &str,
    ) -> Result<PreviewOutcome, SyncError>;

    /// Creates an endpoint from a parameterized template, returning its id
    /// when the platform reports one.
    async fn create_endpoint(
        &self,
        mapping: &ServiceMapping,
        method: &str,
        template: &str,
    ) -> Result<Option<String>, SyncError>;

    async fn find_application(&self, name: &str) -> Result<Option<ApplicationRef>, SyncError>;

    /// Returns the new application id.
    async fn create_application(&self, name: &str) -> Result<String, SyncError>;

    /// Returns the new instance id.
    async fn create_instance(
        &self,
        application_id: &str,
        service: &str,
    ) -> Result<String, SyncError>;
}

#[cfg(test)]
pub(crate) mod testing {
    //! Scriptable in-memory platform shared by the sync tests.

    use super::*;
    use parking_lot::Mutex;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[derive(Default)]
    pub struct Calls {
        pub preview: AtomicUsize,
        pub create_endpoint: AtomicUsize,
        pub find_application: AtomicUsize,
        pub create_application: AtomicUsize,
        pub create_instance: AtomicUsize,
    }

    impl Calls {
        pub fn get(counter: &AtomicUsize) -> usize {
            counter.load(Ordering::SeqCst)
        }
    }

    #[derive(Default)]
    pub struct MockPlatform {
        pub calls: Calls,
        /// Consumed front to back; once empty previews answer `NoMatch`.
        pub preview_script: Mutex<VecDeque<Result<PreviewOutcome, SyncError>>>,
        pub create_script: Mutex<VecDeque<Result<Option<String>, SyncError>>>,
        pub existing_application: Mutex<Option<ApplicationRef>>,
        /// Order in which calls arrived, by name.
        pub log: Mutex<Vec<&'static str>>,
        pub latency: Option<Duration>,
    }

    impl MockPlatform {
        pub fn with_previews(previews: Vec<Result<PreviewOutcome, SyncError>>) -> Self {
            Self {
                preview_script: Mutex::new(previews.into()),
                ..Default::default()
            }
        }

        async fn enter(&self, name: &'static str, counter: &AtomicUsize) {
            counter.fetch_add(1, Ordering::SeqCst);
            self.log.lock().push(name);
            if let Some(latency) = self.latency {
                tokio::time::sleep(latency).await;
            }
        }
    }

    #[async_trait]
    impl RemotePlatform for MockPlatform {
        async fn preview_endpoint(
            &self,
            _mapping: &ServiceMapping,
            _method: &str,
            _path: &str,
        ) -> Result<PreviewOutcome, SyncError> {
            self.enter("preview", &self.calls.preview).await;
            self.preview_script
                .lock()
                .pop_front()
                .unwrap_or(Ok(PreviewOutcome::NoMatch))
        }

        async fn create_endpoint(
            &self,
            _mapping: &ServiceMapping,
            _method: &str,
            _template: &str,
        ) -> Result<Option<String>, SyncError> {
            self.enter("create_endpoint", &self.calls.create_endpoint).await;
            self.create_script
                .lock()
                .pop_front()
                .unwrap_or(Ok(Some("ep-new".to_string())))
        }

        async fn find_application(
            &self,
            _name: &str,
        ) -> Result<Option<ApplicationRef>, SyncError> {
            self.enter("find_application", &self.calls.find_application).await;
            Ok(self.existing_application.lock().clone())
        }

        async fn create_application(&self, name: &str) -> Result<String, SyncError> {
            self.enter("create_application", &self.calls.create_application).await;
            Ok(format!("app-{}", name))
        }

        async fn create_instance(
            &self,
            application_id: &str,
            _service: &str,
        ) -> Result<String, SyncError> {
            self.enter("create_instance", &self.calls.create_instance).await;
            Ok(format!("{}-inst", application_id))
        }
    }
}
