//! Menu-driven view and editor for both power-limit copies
//!
//! Every change goes through [`State::Confirm`]: candidate values are
//! computed and printed first, then each write is put to the decision
//! function on its own. A failed write ends the queue; writes that already
//! landed stay.

use std::collections::VecDeque;
use std::io::{self, BufRead, Write};

use plctl_raw::{apply, PowerUnit};

use crate::cli::parse_watts;
use crate::common::powercap::watts_to_microwatts;
use crate::common::Powercap;
use crate::error::{PlctlError, Result};
use crate::registers::PowerLimitAccess;
use crate::tools::{check_watts, write_limit};

/// Highest watt value the menu accepts for either limit
pub const MAX_INTERACTIVE_WATTS: f64 = 5000.0;

menu_enum! {
    pub enum MenuChoice {
        ShowStatus = 1 => "Show current limits",
        SetLimits = 2 => "Set PL1/PL2 (watts)",
        SyncLimits = 3 => "Sync MSR and MMIO",
        Exit = 4 => "Exit",
    }
}

menu_enum! {
    pub enum WriteSelection {
        Msr = 1 => "MSR",
        Mmio = 2 => "MMIO",
        Both = 3 => "Both",
    }
}

menu_enum! {
    pub enum SyncDirection {
        MsrToMmio = 1 => "MSR -> MMIO",
        MmioToMsr = 2 => "MMIO -> MSR",
    }
}

/// Source of one line of operator input
pub trait Prompt {
    /// Show `label` and read a line; `None` at end of input
    fn line(&mut self, label: &str) -> Option<String>;
}

/// Reads answers from stdin, printing labels to stdout
pub struct StdinPrompt;

impl Prompt for StdinPrompt {
    fn line(&mut self, label: &str) -> Option<String> {
        read_stdin_line(label)
    }
}

fn read_stdin_line(label: &str) -> Option<String> {
    let mut stdout = io::stdout();
    let _ = write!(stdout, "{label}");
    let _ = stdout.flush();

    let mut buffer = String::new();
    match io::stdin().lock().read_line(&mut buffer) {
        Ok(0) | Err(_) => None,
        Ok(_) => Some(buffer.trim_end_matches(['\r', '\n']).to_string()),
    }
}

/// Ask a `[y/N]` question on the terminal; anything but y/Y is a no
pub fn confirm_on_stdin(question: &str) -> bool {
    read_stdin_line(&format!("{question} [y/N]: "))
        .map(|answer| answer.trim().starts_with(['y', 'Y']))
        .unwrap_or(false)
}

/// Which register copy a pending write targets
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegisterCopy {
    Msr,
    Mmio,
}

/// A write that has been computed and shown but not yet performed
#[derive(Debug, Clone, PartialEq)]
pub enum PendingWrite {
    Register {
        target: RegisterCopy,
        current: u64,
        next: u64,
    },
    Powercap {
        pl1_uw: u64,
        pl2_uw: u64,
    },
}

impl PendingWrite {
    /// One-line preview printed before any write is confirmed
    pub fn describe(&self) -> String {
        match self {
            PendingWrite::Register {
                target: RegisterCopy::Msr,
                next,
                ..
            } => format!("MSR  new = 0x{next:016x}"),
            PendingWrite::Register {
                target: RegisterCopy::Mmio,
                next,
                ..
            } => format!("MMIO new = 0x{next:016x}"),
            PendingWrite::Powercap { pl1_uw, pl2_uw } => {
                format!("Powercap new = PL1 {pl1_uw}uW PL2 {pl2_uw}uW")
            }
        }
    }

    pub fn question(&self) -> &'static str {
        match self {
            PendingWrite::Register {
                target: RegisterCopy::Msr,
                ..
            } => "Write MSR?",
            PendingWrite::Register {
                target: RegisterCopy::Mmio,
                ..
            } => "Write MMIO?",
            PendingWrite::Powercap { .. } => "Write kernel powercap (intel-rapl)?",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum State {
    Idle,
    ShowStatus,
    SetLimits,
    SyncLimits,
    Confirm(VecDeque<PendingWrite>),
    Exit,
}

/// One interactive run over opened devices
pub struct Session<'a, P, D, W, E> {
    unit: &'a PowerUnit,
    msr: &'a dyn PowerLimitAccess,
    mmio: &'a dyn PowerLimitAccess,
    powercap: &'a Powercap,
    prompt: P,
    decide: D,
    out: W,
    err: E,
}

impl<'a, P, D, W, E> Session<'a, P, D, W, E>
where
    P: Prompt,
    D: FnMut(&PendingWrite) -> bool,
    W: Write,
    E: Write,
{
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        unit: &'a PowerUnit,
        msr: &'a dyn PowerLimitAccess,
        mmio: &'a dyn PowerLimitAccess,
        powercap: &'a Powercap,
        prompt: P,
        decide: D,
        out: W,
        err: E,
    ) -> Self {
        Self {
            unit,
            msr,
            mmio,
            powercap,
            prompt,
            decide,
            out,
            err,
        }
    }

    /// Drive the state machine from `Idle` until `Exit`
    pub fn run(&mut self) -> Result<()> {
        let mut state = State::Idle;
        while state != State::Exit {
            state = self.step(state)?;
        }
        Ok(())
    }

    /// Advance one transition
    ///
    /// Hardware and input errors are reported on the error writer and lead
    /// back to `Idle`; only a failure to write either stream is returned.
    pub fn step(&mut self, state: State) -> Result<State> {
        let outcome = match state {
            State::Idle => self.menu(),
            State::ShowStatus => self.show_status().map(|()| State::Idle),
            State::SetLimits => self.set_limits(),
            State::SyncLimits => self.sync_limits(),
            State::Confirm(queue) => self.confirm_next(queue),
            State::Exit => Ok(State::Exit),
        };

        match outcome {
            Ok(next) => Ok(next),
            Err(PlctlError::IoError(e)) => Err(PlctlError::IoError(e)),
            Err(e) => {
                tracing::debug!("Returning to menu after error: {e:?}");
                writeln!(self.err, "error: {e}")?;
                writeln!(self.out)?;
                Ok(State::Idle)
            }
        }
    }

    fn menu(&mut self) -> Result<State> {
        writeln!(self.out, "Menu:")?;
        for choice in MenuChoice::all() {
            writeln!(self.out, "  {}) {}", choice.number(), choice.label())?;
        }

        let Some(answer) = self.ask("Select: ") else {
            writeln!(self.out, "Exiting.")?;
            return Ok(State::Exit);
        };

        let next = match answer.parse().ok().and_then(MenuChoice::from_number) {
            Some(MenuChoice::ShowStatus) => State::ShowStatus,
            Some(MenuChoice::SetLimits) => State::SetLimits,
            Some(MenuChoice::SyncLimits) => State::SyncLimits,
            Some(MenuChoice::Exit) => {
                writeln!(self.out, "Done.")?;
                State::Exit
            }
            None => {
                writeln!(self.out, "Unknown choice.\n")?;
                State::Idle
            }
        };
        Ok(next)
    }

    fn show_status(&mut self) -> Result<()> {
        for access in [self.msr, self.mmio] {
            let value = access.read()?;
            write_limit(
                &mut self.out,
                &format!("{:<4} {}", access.name(), access.location()),
                value,
                self.unit,
            )?;
        }

        match self.powercap.read_limits() {
            Ok((pl1_uw, pl2_uw)) => writeln!(
                self.out,
                "Powercap {}\n  PL1  = {} uW ({:.2} W)\n  PL2  = {} uW ({:.2} W)",
                self.powercap.dir().display(),
                pl1_uw,
                pl1_uw as f64 / 1e6,
                pl2_uw,
                pl2_uw as f64 / 1e6
            )?,
            Err(e) => writeln!(self.out, "Powercap unavailable: {e}")?,
        }
        writeln!(self.out)?;
        Ok(())
    }

    fn set_limits(&mut self) -> Result<State> {
        let Some(pl1_watts) = self.ask_watts("PL1 watts (q to cancel): ")? else {
            return self.canceled();
        };
        let Some(pl2_watts) = self.ask_watts("PL2 watts (q to cancel): ")? else {
            return self.canceled();
        };

        writeln!(self.out, "Target: {}", WriteSelection::menu_line())?;
        let Some(answer) = self.ask("Select target: ") else {
            return self.canceled();
        };
        let selection = answer
            .parse()
            .ok()
            .and_then(WriteSelection::from_number)
            .ok_or_else(|| PlctlError::ParseError(format!("invalid target '{answer}'")))?;

        let pl1 = self.unit.watts_to_units(pl1_watts)?;
        let pl2 = self.unit.watts_to_units(pl2_watts)?;

        let targets: &[RegisterCopy] = match selection {
            WriteSelection::Msr => &[RegisterCopy::Msr],
            WriteSelection::Mmio => &[RegisterCopy::Mmio],
            WriteSelection::Both => &[RegisterCopy::Msr, RegisterCopy::Mmio],
        };

        let mut queue = VecDeque::new();
        for &target in targets {
            let current = self.access(target).read()?;
            queue.push_back(PendingWrite::Register {
                target,
                current,
                next: apply(current, pl1, pl2),
            });
        }
        queue.push_back(PendingWrite::Powercap {
            pl1_uw: watts_to_microwatts(pl1_watts)?,
            pl2_uw: watts_to_microwatts(pl2_watts)?,
        });

        writeln!(
            self.out,
            "PL1 = {} ({:.3} W), PL2 = {} ({:.3} W)",
            pl1,
            self.unit.units_to_watts(pl1.get()),
            pl2,
            self.unit.units_to_watts(pl2.get())
        )?;
        self.preview(&queue)?;
        Ok(State::Confirm(queue))
    }

    fn sync_limits(&mut self) -> Result<State> {
        writeln!(self.out, "Sync: {}", SyncDirection::menu_line())?;
        let Some(answer) = self.ask("Select direction: ") else {
            return self.canceled();
        };
        let direction = answer
            .parse()
            .ok()
            .and_then(SyncDirection::from_number)
            .ok_or_else(|| PlctlError::ParseError(format!("invalid direction '{answer}'")))?;

        let (source, target) = match direction {
            SyncDirection::MsrToMmio => (RegisterCopy::Msr, RegisterCopy::Mmio),
            SyncDirection::MmioToMsr => (RegisterCopy::Mmio, RegisterCopy::Msr),
        };

        let value = self.access(source).read()?;
        let current = self.access(target).read()?;
        let queue = VecDeque::from([PendingWrite::Register {
            target,
            current,
            next: value,
        }]);

        self.preview(&queue)?;
        Ok(State::Confirm(queue))
    }

    fn confirm_next(&mut self, mut queue: VecDeque<PendingWrite>) -> Result<State> {
        let Some(pending) = queue.pop_front() else {
            writeln!(self.out)?;
            return Ok(State::Idle);
        };

        if !(self.decide)(&pending) {
            writeln!(self.out, "Skipped: {}", pending.question())?;
            return Ok(State::Confirm(queue));
        }

        if let Err(e) = self.perform(&pending) {
            if !queue.is_empty() {
                tracing::warn!("Dropping {} queued write(s) after failure", queue.len());
            }
            return Err(e);
        }
        Ok(State::Confirm(queue))
    }

    fn perform(&mut self, pending: &PendingWrite) -> Result<()> {
        match *pending {
            PendingWrite::Register { target, next, .. } => {
                let access = self.access(target);
                access.write(next)?;
                writeln!(self.out, "Wrote {} = 0x{next:016x}", access.name())?;
            }
            PendingWrite::Powercap { pl1_uw, pl2_uw } => {
                self.powercap.write_limits(pl1_uw, pl2_uw)?;
                writeln!(self.out, "Wrote powercap PL1={pl1_uw}uW PL2={pl2_uw}uW")?;
            }
        }
        Ok(())
    }

    fn preview(&mut self, queue: &VecDeque<PendingWrite>) -> Result<()> {
        for pending in queue {
            writeln!(self.out, "{}", pending.describe())?;
        }
        Ok(())
    }

    fn access(&self, copy: RegisterCopy) -> &'a dyn PowerLimitAccess {
        match copy {
            RegisterCopy::Msr => self.msr,
            RegisterCopy::Mmio => self.mmio,
        }
    }

    /// Read an answer; blank, `q`, `Q` and end of input cancel
    fn ask(&mut self, label: &str) -> Option<String> {
        let answer = self.prompt.line(label)?;
        let answer = answer.trim();
        if answer.is_empty() || answer.eq_ignore_ascii_case("q") {
            return None;
        }
        Some(answer.to_string())
    }

    fn ask_watts(&mut self, label: &str) -> Result<Option<f64>> {
        match self.ask(label) {
            Some(answer) => {
                let watts = parse_watts(&answer)?;
                Ok(Some(check_watts(watts, MAX_INTERACTIVE_WATTS)?))
            }
            None => Ok(None),
        }
    }

    fn canceled(&mut self) -> Result<State> {
        writeln!(self.out, "Canceled.\n")?;
        Ok(State::Idle)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::powercap::tests::zone;
    use crate::registers::tests::FakeRegister;

    const MSR_VALUE: u64 = 0x0042_84E8_00DF_81B8;
    const MMIO_VALUE: u64 = 0x00DF_81B8_0042_0000;

    struct Script(VecDeque<&'static str>);

    impl Prompt for Script {
        fn line(&mut self, _label: &str) -> Option<String> {
            self.0.pop_front().map(str::to_string)
        }
    }

    struct Rig {
        unit: PowerUnit,
        msr: FakeRegister,
        mmio: FakeRegister,
        powercap: Powercap,
        _zone: tempfile::TempDir,
    }

    impl Rig {
        fn new() -> Self {
            let zone = zone(157_000_000, 157_000_000);
            Self {
                unit: PowerUnit::FIXED_EIGHTH_WATT,
                msr: FakeRegister::new("MSR", MSR_VALUE),
                mmio: FakeRegister::new("MMIO", MMIO_VALUE),
                powercap: Powercap::new(zone.path()),
                _zone: zone,
            }
        }

        /// Run a full session; returns the output and every question asked
        fn run(&self, input: &[&'static str], answers: &[bool]) -> (String, Vec<PendingWrite>) {
            let (out, _, asked) = self.run_split(input, answers);
            (out, asked)
        }

        /// Like `run`, but also returns what went to the error stream
        fn run_split(
            &self,
            input: &[&'static str],
            answers: &[bool],
        ) -> (String, String, Vec<PendingWrite>) {
            let mut asked = Vec::new();
            let mut answers = answers.iter().copied();
            let mut out = Vec::new();
            let mut errors = Vec::new();

            Session::new(
                &self.unit,
                &self.msr,
                &self.mmio,
                &self.powercap,
                Script(input.iter().copied().collect()),
                |pending: &PendingWrite| {
                    asked.push(pending.clone());
                    answers.next().unwrap_or(false)
                },
                &mut out,
                &mut errors,
            )
            .run()
            .unwrap();

            (
                String::from_utf8(out).unwrap(),
                String::from_utf8(errors).unwrap(),
                asked,
            )
        }
    }

    #[test]
    fn test_menu_enums() {
        assert_eq!(
            MenuChoice::menu_line(),
            "1) Show current limits  2) Set PL1/PL2 (watts)  3) Sync MSR and MMIO  4) Exit"
        );
        assert_eq!(WriteSelection::menu_line(), "1) MSR  2) MMIO  3) Both");
        assert_eq!(SyncDirection::from_number(2), Some(SyncDirection::MmioToMsr));
        assert_eq!(SyncDirection::from_number(3), None);
    }

    #[test]
    fn test_exit_paths() {
        let rig = Rig::new();
        assert!(rig.run(&["4"], &[]).0.ends_with("Done.\n"));
        assert!(rig.run(&[""], &[]).0.ends_with("Exiting.\n"));
        assert!(rig.run(&[], &[]).0.ends_with("Exiting.\n"));

        let (out, _) = rig.run(&["9", "x", "4"], &[]);
        assert_eq!(out.matches("Unknown choice.").count(), 2);
    }

    #[test]
    fn test_show_status() {
        let rig = Rig::new();
        let (out, asked) = rig.run(&["1", "4"], &[]);

        assert!(out.contains("MSR  fake MSR\n  raw  = 0x004284e800df81b8"));
        assert!(out.contains("MMIO fake MMIO\n  raw  = 0x00df81b800420000"));
        assert!(out.contains("  PL2  = 1256 (157.00 W)"));
        assert!(out.contains("  PL2  = 440 (55.00 W)"));
        assert!(out.contains("PL1  = 157000000 uW (157.00 W)"));
        assert!(asked.is_empty());
    }

    #[test]
    fn test_set_both_asks_for_each_write() {
        let rig = Rig::new();
        let (out, asked) = rig.run(&["2", "50", "100", "3", "4"], &[true, true, true]);

        assert_eq!(
            asked,
            vec![
                PendingWrite::Register {
                    target: RegisterCopy::Msr,
                    current: MSR_VALUE,
                    next: 0x0042_8320_00DF_8190,
                },
                PendingWrite::Register {
                    target: RegisterCopy::Mmio,
                    current: MMIO_VALUE,
                    next: 0x00DF_8320_0042_0190,
                },
                PendingWrite::Powercap {
                    pl1_uw: 50_000_000,
                    pl2_uw: 100_000_000,
                },
            ]
        );

        assert_eq!(rig.msr.value.get(), 0x0042_8320_00DF_8190);
        assert_eq!(rig.mmio.value.get(), 0x00DF_8320_0042_0190);
        assert_eq!(
            rig.powercap.read_limits().unwrap(),
            (50_000_000, 100_000_000)
        );

        // Preview lines come before the first write
        let preview = out.find("MSR  new = 0x00428320").unwrap();
        let first_write = out.find("Wrote MSR").unwrap();
        assert!(preview < first_write);
        assert!(out.contains("Powercap new = PL1 50000000uW PL2 100000000uW"));
    }

    #[test]
    fn test_declined_writes_are_skipped() {
        let rig = Rig::new();
        let (out, asked) = rig.run(&["2", "50", "100", "2", "4"], &[false, true]);

        assert_eq!(asked.len(), 2);
        assert_eq!(rig.mmio.value.get(), MMIO_VALUE);
        assert_eq!(rig.msr.writes.get(), 0);
        assert_eq!(
            rig.powercap.read_limits().unwrap(),
            (50_000_000, 100_000_000)
        );
        assert!(out.contains("Skipped: Write MMIO?"));
    }

    #[test]
    fn test_failed_write_drops_the_rest_of_the_queue() {
        let rig = Rig::new();
        rig.mmio.fail_writes.set(true);
        let (out, errors, asked) =
            rig.run_split(&["2", "50", "100", "3", "4"], &[true, true, true]);

        // MSR landed and stays; powercap was never offered
        assert_eq!(asked.len(), 2);
        assert_eq!(rig.msr.value.get(), 0x0042_8320_00DF_8190);
        assert_eq!(
            rig.powercap.read_limits().unwrap(),
            (157_000_000, 157_000_000)
        );
        assert!(errors.starts_with("error: Failed to write fake MMIO"));
        assert!(!out.contains("error: "));
        assert!(out.ends_with("Done.\n"));
    }

    #[test]
    fn test_cancel_sentinels() {
        for input in [
            &["2", "q", "4"][..],
            &["2", "50", "Q", "4"][..],
            &["2", "50", "100", "", "4"][..],
            &["3", "", "4"][..],
        ] {
            let rig = Rig::new();
            let (out, asked) = rig.run(input, &[true, true, true]);
            assert!(out.contains("Canceled."), "input {input:?}");
            assert!(asked.is_empty());
            assert_eq!(rig.msr.value.get(), MSR_VALUE);
        }

        // End of input mid-operation cancels, then exits at the menu
        let rig = Rig::new();
        let (out, _) = rig.run(&["2", "50"], &[]);
        assert!(out.contains("Canceled."));
        assert!(out.ends_with("Exiting.\n"));
    }

    #[test]
    fn test_invalid_values_are_rejected_before_any_write() {
        for input in [
            &["2", "0", "4"][..],
            &["2", "5000.5", "4"][..],
            &["2", "fifty", "4"][..],
            &["2", "50", "100", "7", "4"][..],
            &["3", "5", "4"][..],
        ] {
            let rig = Rig::new();
            let (out, errors, asked) = rig.run_split(input, &[true, true, true]);
            assert!(errors.starts_with("error: "), "input {input:?}");
            assert!(!out.contains("error: "), "input {input:?}");
            assert!(asked.is_empty());
        }
    }

    #[test]
    fn test_units_overflow_is_rejected() {
        let mut rig = Rig::new();
        rig.unit = PowerUnit::from_exponent(10).unwrap();
        let (_, errors, asked) = rig.run_split(&["2", "55", "60", "1", "4"], &[true]);

        assert!(errors.contains("error: Value out of range"));
        assert!(asked.is_empty());
    }

    #[test]
    fn test_sync_copies_raw_value_verbatim() {
        let rig = Rig::new();
        let (out, asked) = rig.run(&["3", "1", "4"], &[true]);

        assert_eq!(
            asked,
            vec![PendingWrite::Register {
                target: RegisterCopy::Mmio,
                current: MMIO_VALUE,
                next: MSR_VALUE,
            }]
        );
        assert_eq!(rig.mmio.value.get(), MSR_VALUE);
        assert_eq!(rig.msr.writes.get(), 0);
        assert!(out.contains("Sync: 1) MSR -> MMIO  2) MMIO -> MSR"));

        let rig = Rig::new();
        rig.run(&["3", "2", "4"], &[true]);
        assert_eq!(rig.msr.value.get(), MMIO_VALUE);
    }

    #[test]
    fn test_step_from_confirm_with_empty_queue_returns_to_idle() {
        let rig = Rig::new();
        let mut out = Vec::new();
        let mut errors = Vec::new();
        let mut session = Session::new(
            &rig.unit,
            &rig.msr,
            &rig.mmio,
            &rig.powercap,
            Script(VecDeque::new()),
            |_: &PendingWrite| true,
            &mut out,
            &mut errors,
        );
        assert_eq!(
            session.step(State::Confirm(VecDeque::new())).unwrap(),
            State::Idle
        );
        assert_eq!(session.step(State::Exit).unwrap(), State::Exit);
    }
}
