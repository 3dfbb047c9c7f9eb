use std::collections::{BTreeMap, HashMap};

use rrconf_common::{Rect, Size};

use super::backend::{RandrEvent, ScreenSize, SizeRange};
use super::crtc::{Crtc, CrtcEnv, CrtcState};
use super::error::{ApplyError, BackendError};
use super::mode::Mode;
use super::output::Output;
use super::{Changes, CrtcId, HwContext, ModeId, OutputId, WindowId, NONE};

pub const INSUFFICIENT_VIRTUAL_SIZE: &str = "Insufficient virtual size for the total screen size.\n\
The configured virtual size of your X server is insufficient for this setup. \
This configuration needs to be adjusted.\n\
Changing configuration failed. Please adjust your xorg.conf manually.";

const MM_PER_INCH: f64 = 25.4;
const FALLBACK_DPI: f64 = 96.0;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum NoticeSource {
    Screen,
    Crtc(CrtcId),
    Output(OutputId),
}

/// Something on a screen changed; queued for listeners.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ChangeNotice {
    pub screen: usize,
    pub source: NoticeSource,
    pub changes: Changes,
}

/// The X screen's canvas: always anchored at the origin, between the
/// server's minimum and maximum size.
#[derive(Clone, Debug)]
pub struct ScreenBounds {
    root: WindowId,
    rect: Rect,
    millimeters: Size,
    min_size: Size,
    max_size: Size,
}

impl ScreenBounds {
    pub fn new(root: WindowId) -> Self {
        Self {
            root,
            rect: Rect::default(),
            millimeters: Size::default(),
            min_size: Size::default(),
            max_size: Size::default(),
        }
    }

    pub fn root(&self) -> WindowId {
        self.root
    }

    pub fn rect(&self) -> Rect {
        self.rect
    }

    pub fn min_size(&self) -> Size {
        self.min_size
    }

    pub fn max_size(&self) -> Size {
        self.max_size
    }

    fn update(&mut self, range: SizeRange, size: ScreenSize) -> Changes {
        self.min_size = range.min;
        self.max_size = range.max;
        self.millimeters = size.millimeters;
        self.set_rect_size(size.pixels)
    }

    fn set_rect_size(&mut self, size: Size) -> Changes {
        let rect = Rect::from_parts(Default::default(), size);
        if rect == self.rect {
            return Changes::empty();
        }
        self.rect = rect;
        Changes::RECT
    }

    /// Keeps the current DPI when resizing.
    fn millimeters_for(&self, size: Size) -> Size {
        let scale = |px: i32, cur_px: i32, cur_mm: i32| -> i32 {
            if cur_px > 0 && cur_mm > 0 {
                (px as f64 * cur_mm as f64 / cur_px as f64).round() as i32
            } else {
                (px as f64 * MM_PER_INCH / FALLBACK_DPI).round() as i32
            }
        };
        Size::new(
            scale(size.width, self.rect.width, self.millimeters.width),
            scale(size.height, self.rect.height, self.millimeters.height),
        )
    }

    pub fn set_size(&mut self, hw: &mut HwContext<'_>, size: Size) -> Result<(), BackendError> {
        let size = Size::new(
            size.width.clamp(self.min_size.width, self.max_size.width.max(self.min_size.width)),
            size.height.clamp(self.min_size.height, self.max_size.height.max(self.min_size.height)),
        );
        if size == self.rect.size() {
            return Ok(());
        }

        let millimeters = self.millimeters_for(size);
        log::debug!("Resizing screen {:#x} to {} ({}mm)", self.root, size, millimeters);
        hw.backend.set_screen_size(
            self.root,
            ScreenSize {
                pixels: size,
                millimeters,
            },
        )?;
        self.rect = Rect::from_parts(Default::default(), size);
        self.millimeters = millimeters;
        Ok(())
    }

    /// Grows the canvas until it holds `target`. Returns false without
    /// touching anything if that would exceed the maximum size.
    pub fn adjust_size(&mut self, hw: &mut HwContext<'_>, target: Rect) -> Result<bool, BackendError> {
        let needed = Size::new(
            self.rect.right().max(target.right()),
            self.rect.bottom().max(target.bottom()),
        );
        if !self.max_size.fits(needed) {
            log::warn!("Screen size {} needed, maximum is {}", needed, self.max_size);
            return Ok(false);
        }
        if needed != self.rect.size() {
            self.set_size(hw, needed)?;
        }
        Ok(true)
    }

    /// Shrinks (or grows) the canvas to the bounding box of `areas`. A
    /// screen with nothing enabled is left alone.
    pub fn fit(&mut self, hw: &mut HwContext<'_>, areas: impl IntoIterator<Item = Rect>) -> Result<(), BackendError> {
        let needed = areas
            .into_iter()
            .filter(|r| !r.is_empty())
            .fold(None, |acc: Option<Size>, r| {
                let acc = acc.unwrap_or_default();
                Some(Size::new(acc.width.max(r.right()), acc.height.max(r.bottom())))
            });
        match needed {
            Some(size) => self.set_size(hw, size),
            None => Ok(()),
        }
    }
}

struct SavedProposals {
    crtcs: Vec<(CrtcId, CrtcState, Vec<OutputId>)>,
    outputs: Vec<(OutputId, CrtcId)>,
    primary: OutputId,
}

/// One X screen with its CRTCs, outputs and modes.
pub struct Screen {
    index: usize,
    bounds: ScreenBounds,
    crtcs: BTreeMap<CrtcId, Crtc>,
    outputs: BTreeMap<OutputId, Output>,
    modes: HashMap<ModeId, Mode>,
    current_primary: OutputId,
    original_primary: OutputId,
    proposed_primary: OutputId,
    config_timestamp: u32,
    outputs_unified: bool,
    notices: Vec<ChangeNotice>,
    messages: Vec<String>,
}

impl Screen {
    pub fn new(index: usize, root: WindowId) -> Self {
        Self {
            index,
            bounds: ScreenBounds::new(root),
            crtcs: BTreeMap::new(),
            outputs: BTreeMap::new(),
            modes: HashMap::new(),
            current_primary: NONE,
            original_primary: NONE,
            proposed_primary: NONE,
            config_timestamp: 0,
            outputs_unified: false,
            notices: Vec::new(),
            messages: Vec::new(),
        }
    }

    /// Enumerates the screen and checkpoints it as the session original.
    pub fn load(hw: &mut HwContext<'_>, index: usize, root: WindowId) -> Result<Self, BackendError> {
        let mut screen = Screen::new(index, root);
        screen.load_settings(hw, false)?;
        screen.set_original();
        Ok(screen)
    }

    /// Re-reads resources, CRTCs and outputs from the server.
    pub fn load_settings(&mut self, hw: &mut HwContext<'_>, notify: bool) -> Result<Changes, BackendError> {
        let root = self.bounds.root;
        log::debug!("Loading screen {} (root {:#x})", self.index, root);

        let range = hw.backend.screen_size_range(root)?;
        let size = hw.backend.screen_size(root)?;
        let resources = hw.backend.screen_resources(root)?;
        hw.timestamp.advance(resources.timestamp);
        self.config_timestamp = resources.config_timestamp;

        let mut all = self.bounds.update(range, size);
        if notify && !all.is_empty() {
            self.notices.push(ChangeNotice {
                screen: self.index,
                source: NoticeSource::Screen,
                changes: all,
            });
        }

        self.modes = resources
            .modes
            .iter()
            .map(|timings| (timings.id, Mode::from_timings(timings)))
            .collect();

        self.crtcs.retain(|id, _| resources.crtcs.contains(id));
        for &id in &resources.crtcs {
            let fresh = !self.crtcs.contains_key(&id);
            let crtc = self.crtcs.entry(id).or_insert_with(|| Crtc::new(id));
            let changes = crtc.load_settings(hw, self.config_timestamp, &self.modes)?;
            if fresh {
                crtc.set_original();
            }
            if notify && !changes.is_empty() {
                self.notices.push(ChangeNotice {
                    screen: self.index,
                    source: NoticeSource::Crtc(id),
                    changes,
                });
            }
            all |= changes;
        }

        self.outputs.retain(|id, _| resources.outputs.contains(id));
        for &id in &resources.outputs {
            let output = self.outputs.entry(id).or_insert_with(|| Output::new(id));
            let changes = output.load_settings(hw, self.config_timestamp)?;
            if notify && !changes.is_empty() {
                self.notices.push(ChangeNotice {
                    screen: self.index,
                    source: NoticeSource::Output(id),
                    changes,
                });
            }
            all |= changes;
        }
        all |= self.sync_output_rects(notify);

        if hw.version.has_1_3() {
            let primary = hw.backend.output_primary(root)?;
            if primary != self.current_primary {
                self.current_primary = primary;
                all |= Changes::PRIMARY;
            }
        }
        self.proposed_primary = self.current_primary;

        log::info!(
            "Screen {}: {} (max {}), {} CRTCs, {} outputs, {} modes",
            self.index,
            self.bounds.rect.size(),
            self.bounds.max_size,
            self.crtcs.len(),
            self.outputs.len(),
            self.modes.len()
        );
        Ok(all)
    }

    fn sync_output_rects(&mut self, notify: bool) -> Changes {
        let mut all = Changes::empty();
        for output in self.outputs.values_mut() {
            let rect = self
                .crtcs
                .get(&output.current_crtc())
                .filter(|crtc| crtc.is_enabled())
                .map(Crtc::footprint)
                .unwrap_or_default();
            let changes = output.set_rect(rect);
            if notify && !changes.is_empty() {
                self.notices.push(ChangeNotice {
                    screen: self.index,
                    source: NoticeSource::Output(output.id()),
                    changes,
                });
            }
            all |= changes;
        }
        all
    }

    /// Applies a notification that belongs to this screen.
    pub fn handle_event(&mut self, hw: &mut HwContext<'_>, event: &RandrEvent) -> Result<Changes, BackendError> {
        match event {
            RandrEvent::ScreenChange {
                timestamp,
                config_timestamp,
                size,
                ..
            } => {
                hw.timestamp.advance(*timestamp);
                let mut changes = self.bounds.set_rect_size(*size);
                if !changes.is_empty() {
                    self.notices.push(ChangeNotice {
                        screen: self.index,
                        source: NoticeSource::Screen,
                        changes,
                    });
                }
                if *config_timestamp > self.config_timestamp {
                    changes |= self.load_settings(hw, true)?;
                }
                Ok(changes)
            }
            RandrEvent::Crtc(change) => {
                hw.timestamp.advance(change.timestamp);
                let Some(crtc) = self.crtcs.get_mut(&change.crtc) else {
                    return Ok(Changes::empty());
                };
                let changes = crtc.handle_event(change, &self.modes);
                if !changes.is_empty() {
                    self.notices.push(ChangeNotice {
                        screen: self.index,
                        source: NoticeSource::Crtc(change.crtc),
                        changes,
                    });
                    self.sync_output_rects(true);
                }
                Ok(changes)
            }
            RandrEvent::Output(change) => {
                hw.timestamp.advance(change.timestamp);
                if change.config_timestamp > self.config_timestamp {
                    return self.load_settings(hw, true);
                }
                let Some(output) = self.outputs.get_mut(&change.output) else {
                    return Ok(Changes::empty());
                };
                let changes = output.handle_event(change);
                if !changes.is_empty() {
                    self.notices.push(ChangeNotice {
                        screen: self.index,
                        source: NoticeSource::Output(change.output),
                        changes,
                    });
                    self.sync_output_rects(true);
                }
                Ok(changes)
            }
        }
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn root(&self) -> WindowId {
        self.bounds.root
    }

    pub fn rect(&self) -> Rect {
        self.bounds.rect
    }

    pub fn min_size(&self) -> Size {
        self.bounds.min_size
    }

    pub fn max_size(&self) -> Size {
        self.bounds.max_size
    }

    pub fn config_timestamp(&self) -> u32 {
        self.config_timestamp
    }

    /// The mode with this id, or the null mode.
    pub fn mode(&self, id: ModeId) -> Mode {
        self.modes.get(&id).cloned().unwrap_or_else(Mode::null)
    }

    pub fn crtc(&self, id: CrtcId) -> Option<&Crtc> {
        self.crtcs.get(&id)
    }

    pub fn crtc_mut(&mut self, id: CrtcId) -> Option<&mut Crtc> {
        self.crtcs.get_mut(&id)
    }

    pub fn crtcs(&self) -> impl Iterator<Item = &Crtc> {
        self.crtcs.values()
    }

    pub fn output(&self, id: OutputId) -> Option<&Output> {
        self.outputs.get(&id)
    }

    pub fn output_mut(&mut self, id: OutputId) -> Option<&mut Output> {
        self.outputs.get_mut(&id)
    }

    pub fn outputs(&self) -> impl Iterator<Item = &Output> {
        self.outputs.values()
    }

    pub fn outputs_map(&self) -> &BTreeMap<OutputId, Output> {
        &self.outputs
    }

    pub fn output_by_name(&self, name: &str) -> Option<&Output> {
        self.outputs.values().find(|o| o.name() == name)
    }

    pub fn primary_output(&self) -> OutputId {
        self.current_primary
    }

    pub fn proposed_primary_output(&self) -> OutputId {
        self.proposed_primary
    }

    /// `NONE` clears the primary designation.
    pub fn propose_primary_output(&mut self, output: OutputId) -> bool {
        if output != NONE && !self.outputs.contains_key(&output) {
            return false;
        }
        self.proposed_primary = output;
        true
    }

    pub fn outputs_unified(&self) -> bool {
        self.outputs_unified
    }

    pub fn set_outputs_unified(&mut self, unified: bool) {
        self.outputs_unified = unified;
    }

    /// Grows the canvas to contain `rect`, bounded by the maximum size.
    pub fn adjust_size(&mut self, hw: &mut HwContext<'_>, rect: Rect) -> bool {
        match self.bounds.adjust_size(hw, rect) {
            Ok(done) => done,
            Err(e) => {
                log::warn!("Screen {}: resize failed: {}", self.index, e);
                false
            }
        }
    }

    /// Sets the canvas to the bounding box of the enabled CRTCs.
    pub fn fit(&mut self, hw: &mut HwContext<'_>) -> Result<(), BackendError> {
        let areas: Vec<Rect> = self
            .crtcs
            .values()
            .filter(|crtc| crtc.is_enabled())
            .map(|crtc| {
                if crtc.virtual_mode_enabled() {
                    crtc.footprint().union(&crtc.virtual_rect())
                } else {
                    crtc.footprint()
                }
            })
            .collect();
        self.bounds.fit(hw, areas)
    }

    pub fn set_original(&mut self) {
        for crtc in self.crtcs.values_mut() {
            crtc.set_original();
        }
        self.original_primary = self.current_primary;
    }

    pub fn propose_original(&mut self) {
        for crtc in self.crtcs.values_mut() {
            crtc.propose_original();
        }
        for output in self.outputs.values_mut() {
            let crtc = self
                .crtcs
                .values()
                .find(|crtc| crtc.connected_outputs().contains(&output.id()))
                .map(Crtc::id)
                .unwrap_or(NONE);
            output.propose_crtc(crtc);
        }
        self.proposed_primary = self.original_primary;
    }

    pub fn proposed_changed(&self) -> bool {
        self.proposed_primary != self.current_primary
            || self.crtcs.values().any(Crtc::proposed_changed)
            || self.outputs.values().any(Output::proposed_changed)
    }

    /// Breaks every staged link between `output` and a CRTC.
    pub fn disconnect_output(&mut self, output: OutputId) -> bool {
        let Some(out) = self.outputs.get_mut(&output) else {
            return false;
        };
        out.disconnect_from_crtc();
        for crtc in self.crtcs.values_mut() {
            crtc.remove_output(output);
        }
        true
    }

    /// Stages `output` as switched off.
    pub fn disable_output(&mut self, output: OutputId) -> bool {
        let Some(out) = self.outputs.get_mut(&output) else {
            return false;
        };
        out.slot_disable();
        for crtc in self.crtcs.values_mut() {
            crtc.remove_output(output);
        }
        true
    }

    /// Stages `output` on a CRTC: the one it is on if that is free, else
    /// the first free CRTC it can use.
    pub fn assign_crtc(&mut self, output: OutputId) -> Option<CrtcId> {
        let out = self.outputs.get(&output)?;
        let free = |id: &CrtcId| {
            self.crtcs.get(id).is_some_and(|crtc| {
                crtc.connected_outputs().is_empty() || crtc.connected_outputs() == [output]
            })
        };

        let chosen = if out.current_crtc() != NONE && free(&out.current_crtc()) {
            out.current_crtc()
        } else {
            out.possible_crtcs().iter().copied().find(|id| free(id))?
        };

        let crtc = self.crtcs.get_mut(&chosen)?;
        if !crtc.add_output(output, None) {
            return None;
        }
        self.outputs.get_mut(&output)?.propose_crtc(chosen);
        Some(chosen)
    }

    /// Applies one CRTC. Unless virtual mode was requested the canvas is
    /// fitted to the enabled CRTCs afterwards, whatever the outcome.
    pub fn apply_crtc(&mut self, hw: &mut HwContext<'_>, id: CrtcId) -> Result<Changes, ApplyError> {
        let Some(crtc) = self.crtcs.get_mut(&id) else {
            return Ok(Changes::empty());
        };
        let virtual_requested = crtc.proposed().virtual_mode_enabled;

        let mut env = CrtcEnv {
            hw: &mut *hw,
            bounds: &mut self.bounds,
            modes: &self.modes,
            outputs: &self.outputs,
            config_timestamp: self.config_timestamp,
        };
        let result = crtc.apply_proposed(&mut env);

        if !virtual_requested {
            if let Err(e) = self.fit(hw) {
                log::warn!("Screen {}: could not fit the screen size: {}", self.index, e);
            }
        }

        if let Ok(changes) = &result {
            if !changes.is_empty() {
                self.commit_outputs(id);
                self.notices.push(ChangeNotice {
                    screen: self.index,
                    source: NoticeSource::Crtc(id),
                    changes: *changes,
                });
            }
        }
        result
    }

    fn commit_outputs(&mut self, id: CrtcId) {
        let Some(crtc) = self.crtcs.get(&id) else {
            return;
        };
        let driven = crtc.connected_outputs().to_vec();
        let footprint = if crtc.is_enabled() {
            crtc.footprint()
        } else {
            Rect::default()
        };

        for output in self.outputs.values_mut() {
            if driven.contains(&output.id()) {
                output.commit_crtc(id);
                output.set_rect(footprint);
            } else if output.current_crtc() == id {
                output.commit_crtc(NONE);
                output.set_rect(Rect::default());
            }
        }
    }

    /// One pass over every pending CRTC, disabled ones first, then the
    /// primary output. A stale timestamp aborts the pass.
    fn try_apply(&mut self, hw: &mut HwContext<'_>) -> Result<bool, ApplyError> {
        let mut pending: Vec<CrtcId> = self
            .crtcs
            .values()
            .filter(|crtc| crtc.proposed_changed())
            .map(Crtc::id)
            .collect();
        pending.sort_by_key(|id| {
            self.crtcs
                .get(id)
                .is_some_and(|crtc| !crtc.connected_outputs().is_empty())
        });

        let mut success = true;
        for id in pending {
            match self.apply_crtc(hw, id) {
                Ok(_) => {}
                Err(e @ ApplyError::StaleTimestamp { .. }) => return Err(e),
                Err(e) => {
                    log::warn!("Screen {}: {}", self.index, e);
                    if e.is_insufficient_virtual_size() {
                        self.messages.push(INSUFFICIENT_VIRTUAL_SIZE.to_string());
                    }
                    success = false;
                }
            }
        }

        if self.proposed_primary != self.current_primary && hw.version.has_1_3() {
            match hw.backend.set_output_primary(self.bounds.root, self.proposed_primary) {
                Ok(()) => {
                    self.current_primary = self.proposed_primary;
                    self.notices.push(ChangeNotice {
                        screen: self.index,
                        source: NoticeSource::Screen,
                        changes: Changes::PRIMARY,
                    });
                }
                Err(e) => {
                    log::warn!("Screen {}: setting the primary output failed: {}", self.index, e);
                    success = false;
                }
            }
        }

        Ok(success)
    }

    fn save_proposals(&self) -> SavedProposals {
        SavedProposals {
            crtcs: self
                .crtcs
                .values()
                .map(|c| (c.id(), c.proposed().clone(), c.connected_outputs().to_vec()))
                .collect(),
            outputs: self.outputs.values().map(|o| (o.id(), o.proposed_crtc())).collect(),
            primary: self.proposed_primary,
        }
    }

    fn restore_proposals(&mut self, saved: SavedProposals) {
        for (id, state, outputs) in saved.crtcs {
            if let Some(crtc) = self.crtcs.get_mut(&id) {
                crtc.restore_proposal(state, outputs);
            }
        }
        for (id, crtc) in saved.outputs {
            if let Some(output) = self.outputs.get_mut(&id) {
                output.propose_crtc(crtc);
            }
        }
        self.propose_primary_output(saved.primary);
    }

    /// Applies every pending change. A stale timestamp triggers exactly one
    /// reload, with the proposals carried over, and one more attempt.
    pub fn apply_proposed(&mut self, hw: &mut HwContext<'_>) -> bool {
        if !self.proposed_changed() {
            return true;
        }

        match self.try_apply(hw) {
            Ok(success) => success,
            Err(first) => {
                log::warn!("Screen {}: {}; reloading and retrying once", self.index, first);
                let saved = self.save_proposals();
                if let Err(e) = self.load_settings(hw, true) {
                    log::error!("Screen {}: reload failed: {}", self.index, e);
                    return false;
                }
                self.restore_proposals(saved);

                match self.try_apply(hw) {
                    Ok(success) => success,
                    Err(e) => {
                        log::error!("Screen {}: {} after reload, giving up", self.index, e);
                        false
                    }
                }
            }
        }
    }

    pub fn take_notices(&mut self) -> Vec<ChangeNotice> {
        std::mem::take(&mut self.notices)
    }

    pub fn take_messages(&mut self) -> Vec<String> {
        std::mem::take(&mut self.messages)
    }

    /// The current layout as an `xrandr` invocation.
    pub fn startup_commands(&self) -> Vec<String> {
        let mut command = String::from("xrandr");
        if self.index > 0 {
            command.push_str(&format!(" --screen {}", self.index));
        }

        for output in self.outputs.values() {
            let crtc = self
                .crtcs
                .get(&output.current_crtc())
                .filter(|crtc| crtc.is_enabled());
            let Some(crtc) = crtc else {
                if output.is_connected() || output.is_active() {
                    command.push_str(&format!(" --output {} --off", output.name()));
                }
                continue;
            };

            let mode = self.mode(crtc.current_mode());
            let mode_name = if mode.name().is_empty() {
                mode.size().to_string()
            } else {
                mode.name().to_string()
            };
            let rect = crtc.footprint();
            command.push_str(&format!(
                " --output {} --mode {} --rate {:.2} --pos {}x{} --rotate {}",
                output.name(),
                mode_name,
                crtc.refresh_rate(),
                rect.x,
                rect.y,
                crtc.rotation().xrandr_name()
            ));
            if crtc.virtual_mode_enabled() {
                command.push_str(&format!(" --panning {}", crtc.virtual_rect().size()));
            }
            if crtc.brightness() != 1.0 {
                command.push_str(&format!(" --brightness {:.2}", crtc.brightness()));
            }
            if output.id() == self.current_primary {
                command.push_str(" --primary");
            }
        }

        vec![command]
    }
}
