use rrconf_common::ipc::{ipc_socket_path, IpcCommand, IpcEvent, ModeInfo, OutputInfo, ScreenInfo};
use std::collections::HashMap;
use std::io::{BufRead, BufReader, Write};
use std::os::fd::{AsFd, BorrowedFd};
use std::os::unix::net::{UnixListener, UnixStream};
use std::path::{Path, PathBuf};

use crate::output_config::OutputConfig;
use crate::randr::screen::Screen;

pub struct IpcServer {
    listener: UnixListener,
    path: PathBuf,
    clients: HashMap<u64, IpcClient>,
    next_client_id: u64,
}

struct IpcClient {
    stream: UnixStream,
    reader: BufReader<UnixStream>,
}

impl IpcServer {
    pub fn new() -> Result<Self, Box<dyn std::error::Error>> {
        Self::bind(&ipc_socket_path())
    }

    pub fn bind(socket_path: &Path) -> Result<Self, Box<dyn std::error::Error>> {
        if socket_path.exists() {
            std::fs::remove_file(socket_path)?;
        }

        let listener = UnixListener::bind(socket_path)?;
        listener.set_nonblocking(true)?;

        log::info!("IPC server listening on {}", socket_path.display());

        Ok(Self {
            listener,
            path: socket_path.to_path_buf(),
            clients: HashMap::new(),
            next_client_id: 0,
        })
    }

    pub fn fd(&self) -> BorrowedFd<'_> {
        self.listener.as_fd()
    }

    pub fn accept_connections(&mut self) {
        loop {
            match self.listener.accept() {
                Ok((stream, _addr)) => {
                    if let Err(e) = stream.set_nonblocking(true) {
                        log::warn!("Failed to set IPC client non-blocking: {}", e);
                        continue;
                    }

                    let id = self.next_client_id;
                    self.next_client_id += 1;

                    let reader = BufReader::new(match stream.try_clone() {
                        Ok(s) => s,
                        Err(e) => {
                            log::warn!("Failed to clone stream: {}", e);
                            continue;
                        }
                    });

                    self.clients.insert(id, IpcClient { stream, reader });
                    log::info!("IPC client {} connected", id);
                }
                Err(ref e) if e.kind() == std::io::ErrorKind::WouldBlock => break,
                Err(e) => {
                    log::warn!("IPC accept error: {}", e);
                    break;
                }
            }
        }
    }

    pub fn poll_commands(&mut self) -> Vec<IpcCommand> {
        let mut commands = Vec::new();
        let mut disconnected = Vec::new();

        for (&id, client) in &mut self.clients {
            let mut line = String::new();
            loop {
                line.clear();
                match client.reader.read_line(&mut line) {
                    Ok(0) => {
                        disconnected.push(id);
                        break;
                    }
                    Ok(_) => {
                        let line = line.trim();
                        if line.is_empty() {
                            continue;
                        }
                        match serde_json::from_str::<IpcCommand>(line) {
                            Ok(cmd) => commands.push(cmd),
                            Err(e) => log::warn!("Invalid IPC command from {}: {}", id, e),
                        }
                    }
                    Err(ref e) if e.kind() == std::io::ErrorKind::WouldBlock => break,
                    Err(e) => {
                        log::warn!("IPC read error from {}: {}", id, e);
                        disconnected.push(id);
                        break;
                    }
                }
            }
        }

        for id in disconnected {
            self.clients.remove(&id);
            log::info!("IPC client {} disconnected", id);
        }

        commands
    }

    pub fn broadcast(&mut self, event: &IpcEvent) {
        let json = match serde_json::to_string(event) {
            Ok(j) => j,
            Err(e) => {
                log::warn!("Failed to serialize IPC event: {}", e);
                return;
            }
        };

        let msg = format!("{}\n", json);
        let mut disconnected = Vec::new();

        for (&id, client) in &mut self.clients {
            if let Err(e) = client.stream.write_all(msg.as_bytes()) {
                log::warn!("Failed to send to IPC client {}: {}", id, e);
                disconnected.push(id);
            }
        }

        for id in disconnected {
            self.clients.remove(&id);
        }
    }

    pub fn send_state(&mut self, screens: Vec<ScreenInfo>) {
        self.broadcast(&IpcEvent::State { screens });
    }
}

impl Drop for IpcServer {
    fn drop(&mut self) {
        let _ = std::fs::remove_file(&self.path);
    }
}

/// Wire description of one screen's current layout.
pub fn screen_info(screen: &Screen) -> ScreenInfo {
    let outputs = screen
        .outputs()
        .filter_map(|output| {
            let config = OutputConfig::from_output(screen, output.id())?;
            let modes = output
                .modes()
                .iter()
                .map(|&id| screen.mode(id))
                .filter(|mode| mode.is_valid())
                .map(|mode| ModeInfo {
                    width: mode.size().width,
                    height: mode.size().height,
                    refresh_rate: mode.refresh_rate(),
                })
                .collect();
            Some(OutputInfo {
                name: config.name,
                connected: output.is_connected(),
                active: config.active,
                primary: screen.primary_output() == output.id(),
                x: config.position.x,
                y: config.position.y,
                width: config.resolution.width,
                height: config.resolution.height,
                rotation: config.rotation.degrees(),
                refresh_rate: config.refresh_rate,
                brightness: config.brightness,
                virtual_width: config.virtual_size.width,
                virtual_height: config.virtual_size.height,
                tracking: config.tracking,
                virtual_mode_enabled: config.virtual_mode_enabled,
                modes,
            })
        })
        .collect();

    let rect = screen.rect();
    ScreenInfo {
        index: screen.index(),
        width: rect.width,
        height: rect.height,
        min_width: screen.min_size().width,
        min_height: screen.min_size().height,
        max_width: screen.max_size().width,
        max_height: screen.max_size().height,
        unified: screen.outputs_unified(),
        outputs,
    }
}
