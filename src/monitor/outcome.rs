//! Map a finished unit to our own exit status

use super::state::UnitSnapshot;

pub const EXIT_SUCCESS: i32 = 0;
pub const EXIT_FAILURE: i32 = 1;
/// The main process was killed or dumped core
pub const EXIT_EXCEPTION: i32 = 255;

/// Exit status for a unit's Result and ExecMainStatus
pub fn exit_code_for(result: Option<&str>, exec_main_status: i32) -> i32 {
    match result {
        Some("success") => EXIT_SUCCESS,
        Some("exit-code") if exec_main_status > 0 => exec_main_status,
        Some("signal") | Some("core-dump") => EXIT_EXCEPTION,
        _ => EXIT_FAILURE,
    }
}

pub fn exit_code(snapshot: &UnitSnapshot) -> i32 {
    exit_code_for(snapshot.result(), snapshot.exec_main_status())
}

/// Name for ExecMainCode, which holds a waitid() si_code
pub fn exec_code_name(code: i32) -> &'static str {
    match code {
        libc::CLD_EXITED => "exited",
        libc::CLD_KILLED => "killed",
        libc::CLD_DUMPED => "dumped",
        _ => "unknown",
    }
}

/// One-line summary for the log once a watched unit finished
pub fn describe(unit: &str, snapshot: &UnitSnapshot) -> String {
    format!(
        "Finished with result: {}, main process status: {} ({})",
        snapshot.result().unwrap_or("unknown"),
        snapshot.exec_main_status(),
        unit
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exit_code_table() {
        let cases = [
            (Some("success"), 0, 0),
            (Some("success"), 7, 0),
            (Some("exit-code"), 3, 3),
            (Some("exit-code"), 0, 1),
            (Some("exit-code"), -2, 1),
            (Some("signal"), 9, 255),
            (Some("core-dump"), 11, 255),
            (Some("timeout"), 0, 1),
            (Some("resources"), 0, 1),
            (Some(""), 0, 1),
            (None, 0, 1),
        ];
        for (result, status, expected) in cases {
            assert_eq!(
                exit_code_for(result, status),
                expected,
                "result={:?} status={}",
                result,
                status
            );
        }
    }

    #[test]
    fn test_exit_code_unknown_snapshot() {
        assert_eq!(exit_code(&UnitSnapshot::default()), EXIT_FAILURE);
    }

    #[test]
    fn test_exec_code_name() {
        assert_eq!(exec_code_name(1), "exited");
        assert_eq!(exec_code_name(2), "killed");
        assert_eq!(exec_code_name(3), "dumped");
        assert_eq!(exec_code_name(0), "unknown");
    }
}
