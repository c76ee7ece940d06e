pub mod bbox;
pub mod crop;
pub mod document;
pub mod raster;
pub mod session;
pub mod tools;
pub mod typeset;

use std::sync::Arc;

pub use bbox::{BoundingBox, RawBounds};
pub use session::{ConversionSession, RenderOutput, SessionId, SessionPaths};
pub use tools::Toolchain;
pub use typeset::PreambleRejected;

use crate::error::RenderError;
use crate::settings::Settings;
use crate::store::{DpiStore, PreambleStore, UserId};

#[derive(Clone)]
pub struct Converter {
    settings: Arc<Settings>,
    toolchain: Toolchain,
    preambles: Arc<dyn PreambleStore>,
    dpi: Arc<dyn DpiStore>,
}

impl Converter {
    pub fn new(
        settings: Settings,
        preambles: Arc<dyn PreambleStore>,
        dpi: Arc<dyn DpiStore>,
    ) -> Self {
        let toolchain = Toolchain::from_settings(&settings);
        Self::with_toolchain(settings, toolchain, preambles, dpi)
    }

    pub fn with_toolchain(
        settings: Settings,
        toolchain: Toolchain,
        preambles: Arc<dyn PreambleStore>,
        dpi: Arc<dyn DpiStore>,
    ) -> Self {
        Self {
            settings: Arc::new(settings),
            toolchain,
            preambles,
            dpi,
        }
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn toolchain(&self) -> &Toolchain {
        &self.toolchain
    }

    pub fn preamble_store(&self) -> &dyn PreambleStore {
        self.preambles.as_ref()
    }

    pub fn dpi_store(&self) -> &dyn DpiStore {
        self.dpi.as_ref()
    }

    pub fn session(&self, id: &SessionId) -> ConversionSession<'_> {
        ConversionSession::new(self, id)
    }

    pub async fn convert(
        &self,
        expression: &str,
        user: UserId,
        session: &SessionId,
        want_pdf: bool,
    ) -> Result<RenderOutput, RenderError> {
        self.session(session)
            .convert(expression, user, want_pdf)
            .await
    }

    pub async fn validate_preamble(&self, preamble: &str) -> Result<(), PreambleRejected> {
        typeset::validate_preamble(
            &self.toolchain.typesetter,
            preamble,
            self.settings.max_preamble_length,
            &self.settings.build_dir,
            &SessionId::generate(),
            self.settings.typeset_timeout,
        )
        .await
    }

    pub fn diagnose(&self) -> String {
        tools::diagnose(&self.toolchain)
    }
}
