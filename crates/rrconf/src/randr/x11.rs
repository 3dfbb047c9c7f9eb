//! [`RandrBackend`] over a live X server, using x11rb.

use std::collections::HashMap;
use std::os::fd::{AsFd, BorrowedFd};

use rrconf_common::{Rect, Size};
use x11rb::connection::{Connection as _, RequestConnection as _};
use x11rb::errors::{ConnectError, ConnectionError, ReplyError};
use x11rb::protocol::randr::{self, ConnectionExt as _};
use x11rb::protocol::render;
use x11rb::protocol::xproto::ConnectionExt as _;
use x11rb::protocol::Event;
use x11rb::rust_connection::RustConnection;

use super::backend::*;
use super::error::BackendError;
use super::{CrtcId, OutputId, ProtocolVersion, Rotation, WindowId};

/// Highest protocol version we ask for.
const CLIENT_VERSION: (u32, u32) = (1, 3);

impl From<ConnectError> for BackendError {
    fn from(e: ConnectError) -> Self {
        BackendError::Connection(e.to_string())
    }
}

impl From<ConnectionError> for BackendError {
    fn from(e: ConnectionError) -> Self {
        BackendError::Connection(e.to_string())
    }
}

impl From<ReplyError> for BackendError {
    fn from(e: ReplyError) -> Self {
        match e {
            ReplyError::ConnectionError(e) => BackendError::Connection(e.to_string()),
            ReplyError::X11Error(e) => BackendError::Protocol(format!("{:?}", e.error_kind)),
        }
    }
}

fn to_fixed(value: f64) -> render::Fixed {
    (value * 65536.0).round() as render::Fixed
}

fn from_fixed(value: render::Fixed) -> f64 {
    value as f64 / 65536.0
}

fn rotation_from_x(rotation: randr::Rotation) -> Rotation {
    Rotation::from_bits_truncate(u16::from(rotation))
}

fn rotation_to_x(rotation: Rotation) -> randr::Rotation {
    randr::Rotation::from(rotation.bits())
}

fn connection_from_x(connection: randr::Connection) -> Connection {
    if connection == randr::Connection::CONNECTED {
        Connection::Connected
    } else if connection == randr::Connection::DISCONNECTED {
        Connection::Disconnected
    } else {
        Connection::Unknown
    }
}

fn status_from_x(status: randr::SetConfig) -> SetConfigStatus {
    if status == randr::SetConfig::SUCCESS {
        SetConfigStatus::Success
    } else if status == randr::SetConfig::INVALID_CONFIG_TIME {
        SetConfigStatus::InvalidConfigTime
    } else if status == randr::SetConfig::INVALID_TIME {
        SetConfigStatus::InvalidTime
    } else {
        SetConfigStatus::Failed
    }
}

fn clamp_u16(value: i32) -> u16 {
    value.clamp(0, u16::MAX as i32) as u16
}

fn clamp_i16(value: i32) -> i16 {
    value.clamp(i16::MIN as i32, i16::MAX as i32) as i16
}

pub struct X11Backend {
    conn: RustConnection,
    /// Physical size per root; the server only reports it with events.
    millimeters: HashMap<WindowId, Size>,
}

impl X11Backend {
    /// Connects to `display`, or `$DISPLAY` when `None`.
    pub fn connect(display: Option<&str>) -> Result<Self, BackendError> {
        let (conn, default_screen) = x11rb::connect(display)?;
        let millimeters = conn
            .setup()
            .roots
            .iter()
            .map(|screen| {
                (
                    screen.root,
                    Size::new(
                        screen.width_in_millimeters as i32,
                        screen.height_in_millimeters as i32,
                    ),
                )
            })
            .collect();

        log::info!("Connected to X server, default screen {}", default_screen);
        Ok(Self { conn, millimeters })
    }

    /// The connection's socket, for registering with an event loop.
    pub fn fd(&self) -> BorrowedFd<'_> {
        self.conn.stream().as_fd()
    }

    fn mode_names(reply: &randr::GetScreenResourcesReply) -> Vec<ModeTimings> {
        let mut offset = 0usize;
        reply
            .modes
            .iter()
            .map(|mode| {
                let end = (offset + mode.name_len as usize).min(reply.names.len());
                let name = String::from_utf8_lossy(&reply.names[offset.min(end)..end]).into_owned();
                offset = end;
                ModeTimings {
                    id: mode.id,
                    name,
                    width: mode.width,
                    height: mode.height,
                    dot_clock: mode.dot_clock,
                    htotal: mode.htotal,
                    vtotal: mode.vtotal,
                    double_scan: mode.mode_flags.contains(randr::ModeFlag::DOUBLE_SCAN),
                    interlace: mode.mode_flags.contains(randr::ModeFlag::INTERLACE),
                }
            })
            .collect()
    }

    fn convert_event(&mut self, event: Event) -> Option<RandrEvent> {
        match event {
            Event::RandrScreenChangeNotify(e) => {
                self.millimeters
                    .insert(e.root, Size::new(e.mwidth as i32, e.mheight as i32));
                Some(RandrEvent::ScreenChange {
                    root: e.root,
                    window: e.request_window,
                    timestamp: e.timestamp,
                    config_timestamp: e.config_timestamp,
                    size: Size::new(e.width as i32, e.height as i32),
                    rotation: rotation_from_x(e.rotation),
                })
            }
            Event::RandrNotify(e) if e.sub_code == randr::Notify::CRTC_CHANGE => {
                let cc = e.u.as_cc();
                Some(RandrEvent::Crtc(CrtcChange {
                    window: cc.window,
                    crtc: cc.crtc,
                    mode: cc.mode,
                    rotation: rotation_from_x(cc.rotation),
                    rect: Rect::new(cc.x as i32, cc.y as i32, cc.width as i32, cc.height as i32),
                    timestamp: cc.timestamp,
                }))
            }
            Event::RandrNotify(e) if e.sub_code == randr::Notify::OUTPUT_CHANGE => {
                let oc = e.u.as_oc();
                Some(RandrEvent::Output(OutputChange {
                    window: oc.window,
                    output: oc.output,
                    crtc: oc.crtc,
                    mode: oc.mode,
                    rotation: rotation_from_x(oc.rotation),
                    connection: connection_from_x(oc.connection),
                    timestamp: oc.timestamp,
                    config_timestamp: oc.config_timestamp,
                }))
            }
            other => {
                log::trace!("Ignoring X event {:?}", other);
                None
            }
        }
    }
}

impl RandrBackend for X11Backend {
    fn extension(&mut self) -> BackendResult<Option<ExtensionInfo>> {
        let Some(info) = self.conn.extension_information(randr::X11_EXTENSION_NAME)? else {
            return Ok(None);
        };
        let reply = self
            .conn
            .randr_query_version(CLIENT_VERSION.0, CLIENT_VERSION.1)?
            .reply()?;
        Ok(Some(ExtensionInfo {
            version: ProtocolVersion::new(reply.major_version, reply.minor_version),
            event_base: info.first_event,
            error_base: info.first_error,
        }))
    }

    fn screen_roots(&self) -> Vec<WindowId> {
        self.conn.setup().roots.iter().map(|screen| screen.root).collect()
    }

    fn screen_resources(&mut self, root: WindowId) -> BackendResult<ScreenResources> {
        let reply = self.conn.randr_get_screen_resources(root)?.reply()?;
        Ok(ScreenResources {
            timestamp: reply.timestamp,
            config_timestamp: reply.config_timestamp,
            crtcs: reply.crtcs.clone(),
            outputs: reply.outputs.clone(),
            modes: Self::mode_names(&reply),
        })
    }

    fn screen_size_range(&mut self, root: WindowId) -> BackendResult<SizeRange> {
        let reply = self.conn.randr_get_screen_size_range(root)?.reply()?;
        Ok(SizeRange {
            min: Size::new(reply.min_width as i32, reply.min_height as i32),
            max: Size::new(reply.max_width as i32, reply.max_height as i32),
        })
    }

    fn screen_size(&mut self, root: WindowId) -> BackendResult<ScreenSize> {
        let geometry = self.conn.get_geometry(root)?.reply()?;
        Ok(ScreenSize {
            pixels: Size::new(geometry.width as i32, geometry.height as i32),
            millimeters: self.millimeters.get(&root).copied().unwrap_or_default(),
        })
    }

    fn set_screen_size(&mut self, root: WindowId, size: ScreenSize) -> BackendResult<()> {
        self.conn
            .randr_set_screen_size(
                root,
                clamp_u16(size.pixels.width),
                clamp_u16(size.pixels.height),
                size.millimeters.width.max(0) as u32,
                size.millimeters.height.max(0) as u32,
            )?
            .check()?;
        self.millimeters.insert(root, size.millimeters);
        Ok(())
    }

    fn config_times(&mut self, root: WindowId) -> BackendResult<ConfigTimes> {
        let reply = self.conn.randr_get_screen_resources_current(root)?.reply()?;
        Ok(ConfigTimes {
            timestamp: reply.timestamp,
            config_timestamp: reply.config_timestamp,
        })
    }

    fn crtc_info(&mut self, crtc: CrtcId, config_timestamp: u32) -> BackendResult<CrtcInfo> {
        let reply = self.conn.randr_get_crtc_info(crtc, config_timestamp)?.reply()?;
        Ok(CrtcInfo {
            timestamp: reply.timestamp,
            rect: Rect::new(
                reply.x as i32,
                reply.y as i32,
                reply.width as i32,
                reply.height as i32,
            ),
            mode: reply.mode,
            rotation: rotation_from_x(reply.rotation),
            rotations: rotation_from_x(reply.rotations),
            outputs: reply.outputs,
            possible: reply.possible,
        })
    }

    fn set_crtc_config(
        &mut self,
        crtc: CrtcId,
        config: &CrtcConfig,
        timestamp: u32,
        config_timestamp: u32,
    ) -> BackendResult<SetConfigReply> {
        let reply = self
            .conn
            .randr_set_crtc_config(
                crtc,
                timestamp,
                config_timestamp,
                clamp_i16(config.x),
                clamp_i16(config.y),
                config.mode,
                rotation_to_x(config.rotation),
                &config.outputs,
            )?
            .reply()?;
        Ok(SetConfigReply {
            status: status_from_x(reply.status),
            timestamp: reply.timestamp,
        })
    }

    fn panning(&mut self, crtc: CrtcId) -> BackendResult<Panning> {
        let reply = self.conn.randr_get_panning(crtc)?.reply()?;
        Ok(Panning {
            rect: Rect::new(
                reply.left as i32,
                reply.top as i32,
                reply.width as i32,
                reply.height as i32,
            ),
            track: Rect::new(
                reply.track_left as i32,
                reply.track_top as i32,
                reply.track_width as i32,
                reply.track_height as i32,
            ),
            border: [
                reply.border_left,
                reply.border_top,
                reply.border_right,
                reply.border_bottom,
            ],
        })
    }

    fn set_panning(&mut self, crtc: CrtcId, panning: &Panning, timestamp: u32) -> BackendResult<SetConfigReply> {
        let reply = self
            .conn
            .randr_set_panning(
                crtc,
                timestamp,
                clamp_u16(panning.rect.x),
                clamp_u16(panning.rect.y),
                clamp_u16(panning.rect.width),
                clamp_u16(panning.rect.height),
                clamp_u16(panning.track.x),
                clamp_u16(panning.track.y),
                clamp_u16(panning.track.width),
                clamp_u16(panning.track.height),
                panning.border[0],
                panning.border[1],
                panning.border[2],
                panning.border[3],
            )?
            .reply()?;
        Ok(SetConfigReply {
            status: status_from_x(reply.status),
            timestamp: reply.timestamp,
        })
    }

    fn crtc_transform(&mut self, crtc: CrtcId) -> BackendResult<Transform> {
        let reply = self.conn.randr_get_crtc_transform(crtc)?.reply()?;
        let t = reply.current_transform;
        Ok(Transform {
            matrix: [
                [from_fixed(t.matrix11), from_fixed(t.matrix12), from_fixed(t.matrix13)],
                [from_fixed(t.matrix21), from_fixed(t.matrix22), from_fixed(t.matrix23)],
                [from_fixed(t.matrix31), from_fixed(t.matrix32), from_fixed(t.matrix33)],
            ],
        })
    }

    fn set_crtc_transform(&mut self, crtc: CrtcId, transform: &Transform, filter: &str) -> BackendResult<()> {
        let m = &transform.matrix;
        let t = render::Transform {
            matrix11: to_fixed(m[0][0]),
            matrix12: to_fixed(m[0][1]),
            matrix13: to_fixed(m[0][2]),
            matrix21: to_fixed(m[1][0]),
            matrix22: to_fixed(m[1][1]),
            matrix23: to_fixed(m[1][2]),
            matrix31: to_fixed(m[2][0]),
            matrix32: to_fixed(m[2][1]),
            matrix33: to_fixed(m[2][2]),
        };
        self.conn
            .randr_set_crtc_transform(crtc, t, filter.as_bytes(), &[])?
            .check()?;
        Ok(())
    }

    fn gamma_size(&mut self, crtc: CrtcId) -> BackendResult<usize> {
        let reply = self.conn.randr_get_crtc_gamma_size(crtc)?.reply()?;
        Ok(reply.size as usize)
    }

    fn gamma(&mut self, crtc: CrtcId) -> BackendResult<GammaRamp> {
        let reply = self.conn.randr_get_crtc_gamma(crtc)?.reply()?;
        Ok(GammaRamp {
            red: reply.red,
            green: reply.green,
            blue: reply.blue,
        })
    }

    fn set_gamma(&mut self, crtc: CrtcId, ramp: &GammaRamp) -> BackendResult<()> {
        self.conn
            .randr_set_crtc_gamma(crtc, &ramp.red, &ramp.green, &ramp.blue)?
            .check()?;
        Ok(())
    }

    fn output_info(&mut self, output: OutputId, config_timestamp: u32) -> BackendResult<OutputInfo> {
        let reply = self.conn.randr_get_output_info(output, config_timestamp)?.reply()?;
        Ok(OutputInfo {
            timestamp: reply.timestamp,
            name: String::from_utf8_lossy(&reply.name).into_owned(),
            connection: connection_from_x(reply.connection),
            crtc: reply.crtc,
            crtcs: reply.crtcs,
            modes: reply.modes,
            preferred: reply.num_preferred as usize,
        })
    }

    fn output_primary(&mut self, root: WindowId) -> BackendResult<OutputId> {
        Ok(self.conn.randr_get_output_primary(root)?.reply()?.output)
    }

    fn set_output_primary(&mut self, root: WindowId, output: OutputId) -> BackendResult<()> {
        self.conn.randr_set_output_primary(root, output)?.check()?;
        Ok(())
    }

    fn select_input(&mut self, root: WindowId) -> BackendResult<()> {
        let mask = randr::NotifyMask::SCREEN_CHANGE
            | randr::NotifyMask::CRTC_CHANGE
            | randr::NotifyMask::OUTPUT_CHANGE;
        self.conn.randr_select_input(root, mask)?.check()?;
        Ok(())
    }

    fn poll_event(&mut self) -> BackendResult<Option<RandrEvent>> {
        while let Some(event) = self.conn.poll_for_event()? {
            if let Some(event) = self.convert_event(event) {
                return Ok(Some(event));
            }
        }
        Ok(None)
    }

    fn flush(&mut self) -> BackendResult<()> {
        self.conn.flush()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_fixed_point() {
        assert_eq!(to_fixed(1.0), 65536);
        assert_eq!(to_fixed(-0.5), -32768);
        assert_relative_eq!(from_fixed(to_fixed(1.3333)), 1.3333, epsilon = 1.0 / 65536.0);
    }

    #[test]
    fn test_rotation_bits_match_protocol() {
        assert_eq!(u16::from(rotation_to_x(Rotation::ROTATE_90)), u16::from(randr::Rotation::ROTATE90));
        assert_eq!(
            rotation_from_x(randr::Rotation::ROTATE270 | randr::Rotation::REFLECT_X),
            Rotation::ROTATE_270 | Rotation::REFLECT_X
        );
    }

    #[test]
    fn test_status_mapping() {
        assert_eq!(status_from_x(randr::SetConfig::SUCCESS), SetConfigStatus::Success);
        assert_eq!(status_from_x(randr::SetConfig::INVALID_TIME), SetConfigStatus::InvalidTime);
        assert_eq!(status_from_x(randr::SetConfig::FAILED), SetConfigStatus::Failed);
        assert_eq!(clamp_i16(40000), i16::MAX);
        assert_eq!(clamp_u16(-5), 0);
    }
}
