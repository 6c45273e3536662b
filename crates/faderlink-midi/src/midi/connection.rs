//! MIDI port discovery and connection
//!
//! Uses midir for cross-platform MIDI I/O (ALSA on Linux, CoreMIDI on macOS, WinMM on Windows).
//! Ports are matched by a case-insensitive substring of their name.

use midir::{MidiInput, MidiInputPort, MidiOutput, MidiOutputConnection};

/// Error type for MIDI connection operations
#[derive(Debug, thiserror::Error)]
pub enum MidiConnectionError {
    #[error("Failed to initialize MIDI input: {0}")]
    InputInitError(String),

    #[error("Failed to initialize MIDI output: {0}")]
    OutputInitError(String),

    #[error("No MIDI input ports available")]
    NoInputPorts,

    #[error("No MIDI {direction} port found matching pattern: {pattern}")]
    PortNotFound {
        direction: &'static str,
        pattern: String,
    },

    #[error("Failed to connect to MIDI port: {0}")]
    ConnectionError(String),

    #[error("Failed to get port info: {0}")]
    PortInfoError(String),
}

fn name_matches(name: &str, pattern: &str) -> bool {
    name.to_lowercase().contains(pattern)
}

/// Find the input port of a device, returning the MidiInput so the caller
/// can attach its callback
pub fn find_input_port(port_match: &str) -> Result<(MidiInput, MidiInputPort), MidiConnectionError> {
    let pattern = port_match.to_lowercase();

    let mut midi_in = MidiInput::new("faderlink-in")
        .map_err(|e| MidiConnectionError::InputInitError(e.to_string()))?;
    // The bulk fader reply arrives as SysEx, which midir filters by default
    midi_in.ignore(midir::Ignore::None);

    let in_ports = midi_in.ports();
    if in_ports.is_empty() {
        return Err(MidiConnectionError::NoInputPorts);
    }

    let input_port = in_ports
        .into_iter()
        .find(|port| {
            midi_in
                .port_name(port)
                .map(|name| name_matches(&name, &pattern))
                .unwrap_or(false)
        })
        .ok_or_else(|| MidiConnectionError::PortNotFound {
            direction: "input",
            pattern: port_match.to_string(),
        })?;

    let port_name = midi_in
        .port_name(&input_port)
        .map_err(|e| MidiConnectionError::PortInfoError(e.to_string()))?;

    log::info!("MIDI: Found input port: {}", port_name);

    Ok((midi_in, input_port))
}

/// Find and connect to the output port of a device
pub fn connect_output(port_match: &str) -> Result<MidiOutputConnection, MidiConnectionError> {
    let pattern = port_match.to_lowercase();

    let midi_out = MidiOutput::new("faderlink-out")
        .map_err(|e| MidiConnectionError::OutputInitError(e.to_string()))?;

    let out_ports = midi_out.ports();
    let output_port = out_ports
        .iter()
        .find(|port| {
            midi_out
                .port_name(port)
                .map(|name| name_matches(&name, &pattern))
                .unwrap_or(false)
        })
        .ok_or_else(|| MidiConnectionError::PortNotFound {
            direction: "output",
            pattern: port_match.to_string(),
        })?;

    let port_name = midi_out
        .port_name(output_port)
        .map_err(|e| MidiConnectionError::PortInfoError(e.to_string()))?;
    log::info!("MIDI: Found output port: {}", port_name);

    let connection = midi_out
        .connect(output_port, "faderlink-output")
        .map_err(|e| MidiConnectionError::ConnectionError(e.to_string()))?;

    log::info!("MIDI: Connected to output port");
    Ok(connection)
}

/// List all available MIDI input ports
pub fn list_input_ports() -> Result<Vec<String>, MidiConnectionError> {
    let midi_in = MidiInput::new("faderlink-list")
        .map_err(|e| MidiConnectionError::InputInitError(e.to_string()))?;

    let ports: Vec<String> = midi_in
        .ports()
        .iter()
        .filter_map(|port| midi_in.port_name(port).ok())
        .collect();

    Ok(ports)
}

/// List all available MIDI output ports
pub fn list_output_ports() -> Result<Vec<String>, MidiConnectionError> {
    let midi_out = MidiOutput::new("faderlink-list")
        .map_err(|e| MidiConnectionError::OutputInitError(e.to_string()))?;

    let ports: Vec<String> = midi_out
        .ports()
        .iter()
        .filter_map(|port| midi_out.port_name(port).ok())
        .collect();

    Ok(ports)
}
