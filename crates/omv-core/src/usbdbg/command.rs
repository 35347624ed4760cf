//! Debug command codes.
//!
//! Every command is described by one [`CommandSpec`] row in [`COMMANDS`]:
//! its wire code, how the length of its data phase is determined, and what
//! has to be present for it to be served. The top bit of a code marks a
//! device-to-host data phase.

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Command {
    FwVersion,
    FrameSize,
    FrameDump,
    ArchStr,
    ScriptExec,
    ScriptStop,
    ScriptRunning,
    SysReset,
    SysResetToBootloader,
    FbEnable,
    TxBufLen,
    TxBuf,
    SensorId,
    GetState,
    ProfileSize,
    ProfileDump,
    ProfileMode,
    ProfileEvent,
    ProfileReset,
}

/// Data phase direction, as seen from the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Device to host.
    In,
    /// Host to device.
    Out,
}

/// How a command's data phase length is set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Length {
    /// No data phase; the command acts on receipt.
    None,
    /// The payload is this many bytes.
    Fixed(usize),
    /// The host declares the length in the header.
    Declared,
}

/// Collaborator a command depends on. Commands whose requirement is not met
/// are ignored like unknown codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Requires {
    Nothing,
    Profiler,
    /// Profiler with hardware event counters.
    Pmu,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommandSpec {
    pub command: Command,
    pub code: u8,
    pub length: Length,
    pub requires: Requires,
}

impl CommandSpec {
    pub fn direction(&self) -> Option<Direction> {
        match self.length {
            Length::None => None,
            _ if self.code & 0x80 != 0 => Some(Direction::In),
            _ => Some(Direction::Out),
        }
    }
}

const fn spec(command: Command, code: u8, length: Length, requires: Requires) -> CommandSpec {
    CommandSpec {
        command,
        code,
        length,
        requires,
    }
}

/// One row per [`Command`], in declaration order.
pub const COMMANDS: [CommandSpec; 19] = [
    spec(Command::FwVersion, 0x80, Length::Fixed(12), Requires::Nothing),
    spec(Command::FrameSize, 0x81, Length::Fixed(12), Requires::Nothing),
    spec(Command::FrameDump, 0x82, Length::Declared, Requires::Nothing),
    spec(Command::ArchStr, 0x83, Length::Fixed(64), Requires::Nothing),
    spec(Command::ScriptExec, 0x05, Length::Declared, Requires::Nothing),
    spec(Command::ScriptStop, 0x06, Length::None, Requires::Nothing),
    spec(Command::ScriptRunning, 0x87, Length::Fixed(4), Requires::Nothing),
    spec(Command::SysReset, 0x0C, Length::None, Requires::Nothing),
    spec(Command::SysResetToBootloader, 0x0E, Length::None, Requires::Nothing),
    spec(Command::FbEnable, 0x0D, Length::Fixed(4), Requires::Nothing),
    spec(Command::TxBufLen, 0x8E, Length::Fixed(4), Requires::Nothing),
    spec(Command::TxBuf, 0x8F, Length::Declared, Requires::Nothing),
    spec(Command::SensorId, 0x90, Length::Fixed(4), Requires::Nothing),
    spec(Command::GetState, 0x93, Length::Fixed(64), Requires::Nothing),
    spec(Command::ProfileSize, 0x94, Length::Fixed(4), Requires::Profiler),
    spec(Command::ProfileDump, 0x95, Length::Declared, Requires::Profiler),
    spec(Command::ProfileMode, 0x16, Length::Fixed(4), Requires::Profiler),
    spec(Command::ProfileEvent, 0x17, Length::Fixed(8), Requires::Pmu),
    spec(Command::ProfileReset, 0x18, Length::None, Requires::Profiler),
];

impl Command {
    pub fn from_code(code: u8) -> Option<Command> {
        COMMANDS.iter().find(|s| s.code == code).map(|s| s.command)
    }

    /// The command's row. Rows are in variant order.
    pub fn spec(self) -> &'static CommandSpec {
        &COMMANDS[self as usize]
    }

    pub fn code(self) -> u8 {
        self.spec().code
    }

    pub fn direction(self) -> Option<Direction> {
        self.spec().direction()
    }
}
