use rrconf_common::Rect;

use super::backend::{Connection, OutputChange, OutputInfo};
use super::error::BackendError;
use super::{Changes, CrtcId, HwContext, ModeId, OutputId, NONE};

/// One physical connector.
#[derive(Clone, Debug)]
pub struct Output {
    id: OutputId,
    name: String,
    connection: Connection,
    current_crtc: CrtcId,
    proposed_crtc: CrtcId,
    modes: Vec<ModeId>,
    preferred: usize,
    possible_crtcs: Vec<CrtcId>,
    rect: Rect,
}

impl Output {
    pub fn new(id: OutputId) -> Self {
        Self {
            id,
            name: String::new(),
            connection: Connection::Unknown,
            current_crtc: NONE,
            proposed_crtc: NONE,
            modes: Vec::new(),
            preferred: 0,
            possible_crtcs: Vec::new(),
            rect: Rect::default(),
        }
    }

    pub fn load_settings(
        &mut self,
        hw: &mut HwContext<'_>,
        config_timestamp: u32,
    ) -> Result<Changes, BackendError> {
        let info = hw.backend.output_info(self.id, config_timestamp)?;
        hw.timestamp.advance(info.timestamp);
        Ok(self.update_from(&info))
    }

    pub(crate) fn update_from(&mut self, info: &OutputInfo) -> Changes {
        let mut changes = Changes::empty();

        if self.name != info.name {
            self.name = info.name.clone();
        }
        if self.connection != info.connection {
            self.connection = info.connection;
            changes |= Changes::CONNECTION;
        }
        if self.current_crtc != info.crtc {
            self.current_crtc = info.crtc;
            changes |= Changes::CRTC;
        }
        if self.modes != info.modes {
            self.modes = info.modes.clone();
            changes |= Changes::MODE;
        }
        self.preferred = info.preferred;
        self.possible_crtcs = info.crtcs.clone();
        self.proposed_crtc = self.current_crtc;

        if !changes.is_empty() {
            log::debug!("Output {} ({}) changed: {:?}", self.name, self.id, changes);
        }
        changes
    }

    /// Output-change notification. Connection and CRTC only; mode lists need
    /// a full query.
    pub fn handle_event(&mut self, change: &OutputChange) -> Changes {
        let mut changes = Changes::empty();

        if self.connection != change.connection {
            self.connection = change.connection;
            changes |= Changes::CONNECTION;
        }
        if self.current_crtc != change.crtc {
            if self.proposed_crtc == self.current_crtc {
                self.proposed_crtc = change.crtc;
            }
            self.current_crtc = change.crtc;
            changes |= Changes::CRTC;
        }

        if !changes.is_empty() {
            log::debug!("Output {} event: {:?}", self.name, changes);
        }
        changes
    }

    pub fn id(&self) -> OutputId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn connection(&self) -> Connection {
        self.connection
    }

    pub fn is_connected(&self) -> bool {
        self.connection == Connection::Connected
    }

    pub fn is_active(&self) -> bool {
        self.current_crtc != NONE
    }

    /// Footprint of the CRTC driving this output, empty when inactive.
    pub fn rect(&self) -> Rect {
        self.rect
    }

    pub(crate) fn set_rect(&mut self, rect: Rect) -> Changes {
        if self.rect == rect {
            return Changes::empty();
        }
        self.rect = rect;
        Changes::RECT
    }

    pub fn modes(&self) -> &[ModeId] {
        &self.modes
    }

    /// Modes the monitor advertises as preferred, best first.
    pub fn preferred_modes(&self) -> &[ModeId] {
        &self.modes[..self.preferred.min(self.modes.len())]
    }

    pub fn possible_crtcs(&self) -> &[CrtcId] {
        &self.possible_crtcs
    }

    pub fn current_crtc(&self) -> CrtcId {
        self.current_crtc
    }

    pub fn proposed_crtc(&self) -> CrtcId {
        self.proposed_crtc
    }

    /// Records that the server now drives this output from `crtc`.
    pub(crate) fn commit_crtc(&mut self, crtc: CrtcId) {
        self.current_crtc = crtc;
    }

    pub fn proposed_changed(&self) -> bool {
        self.proposed_crtc != self.current_crtc
    }

    /// Returns false if this output can't be driven by `crtc`.
    pub fn propose_crtc(&mut self, crtc: CrtcId) -> bool {
        if crtc != NONE && !self.possible_crtcs.contains(&crtc) {
            return false;
        }
        self.proposed_crtc = crtc;
        true
    }

    /// Detaches the staged CRTC and returns it so the owner can drop this
    /// output from that CRTC's list.
    pub fn disconnect_from_crtc(&mut self) -> CrtcId {
        std::mem::replace(&mut self.proposed_crtc, NONE)
    }

    /// Stages "off" for this output.
    pub fn slot_disable(&mut self) -> CrtcId {
        log::debug!("Disabling output {}", self.name);
        self.disconnect_from_crtc()
    }
}
