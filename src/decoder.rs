//! Readable descriptions for well-known events when no message template can be
//! loaded, which is always the case for `.evtx` files read off-host.

use crate::event_xml::EventXml;

pub fn describe(ev: &EventXml) -> Option<String> {
    let id = ev.event_id? & 0xFFFF;
    let first = |names: &[&str]| ev.data_value(names).unwrap_or_default().to_string();
    match (ev.provider.as_str(), id) {
        ("Service Control Manager", 7000) => Some(format!("The {} service failed to start.", first(&["param1", "ServiceName"]))),
        ("Service Control Manager", 7001) => Some(format!("The {} service depends on a service that failed to start.", first(&["param1"]))),
        ("Service Control Manager", 7009) => Some(format!("A timeout was reached while waiting for the {} service to connect.", first(&["param2", "param1"]))),
        ("Service Control Manager", 7023) => Some(format!("The {} service terminated with an error.", first(&["param1"]))),
        ("Service Control Manager", 7031 | 7034) => Some(format!("The {} service terminated unexpectedly.", first(&["param1"]))),
        ("Service Control Manager", 7036) => Some(format!("The {} service entered the {} state.", first(&["param1"]), first(&["param2"]))),
        ("Service Control Manager", 7040) => Some(format!("The start type of the {} service was changed from {} to {}.", first(&["param1"]), first(&["param2"]), first(&["param3"]))),
        ("Disk" | "disk", 7) => Some(format!("The device {} has a bad block.", first(&["DeviceName", "param1"]))),
        ("Disk" | "disk", 11) => Some(format!("The driver detected a controller error on {}.", first(&["DeviceName", "param1"]))),
        ("Disk" | "disk", 51) => Some("An error was detected on a device during a paging operation.".to_string()),
        ("Disk" | "disk", 157) => Some(format!("Disk {} has been surprise removed.", first(&["DeviceName", "param1"]))),
        ("Microsoft-Windows-Ntfs" | "Ntfs", 55) => Some("A corruption was discovered in the file system structure.".to_string()),
        ("Microsoft-Windows-Ntfs" | "Ntfs", 57) => Some("The system failed to flush data to the transaction log.".to_string()),
        ("Microsoft-Windows-Kernel-Power", 41) => Some("The system has rebooted without cleanly shutting down first.".to_string()),
        ("Microsoft-Windows-Kernel-General", 12) => Some("The operating system started.".to_string()),
        ("Microsoft-Windows-Kernel-General", 13) => Some("The operating system is shutting down.".to_string()),
        ("EventLog", 6005) => Some("The Event log service was started.".to_string()),
        ("EventLog", 6006) => Some("The Event log service was stopped.".to_string()),
        ("EventLog", 6008) => Some("The previous system shutdown was unexpected.".to_string()),
        ("Microsoft-Windows-Eventlog", 1102) => Some(format!("The audit log was cleared by {}.", first(&["SubjectUserName"]))),
        ("Microsoft-Windows-Security-Auditing", 4624) => Some(format!("An account was successfully logged on: {}\\{} (logon type {}).", first(&["TargetDomainName"]), first(&["TargetUserName"]), first(&["LogonType"]))),
        ("Microsoft-Windows-Security-Auditing", 4625) => Some(format!("An account failed to log on: {}\\{} (logon type {}).", first(&["TargetDomainName"]), first(&["TargetUserName"]), first(&["LogonType"]))),
        ("Microsoft-Windows-Security-Auditing", 4634) => Some(format!("An account was logged off: {}\\{}.", first(&["TargetDomainName"]), first(&["TargetUserName"]))),
        ("Microsoft-Windows-Security-Auditing", 4672) => Some(format!("Special privileges assigned to new logon: {}.", first(&["SubjectUserName"]))),
        ("Microsoft-Windows-DNS-Client", 1014) => match ev.data_value(&["QueryName"]) {
            Some(q) => Some(format!("Name resolution for {} timed out.", q)),
            None => Some("Name resolution timed out.".to_string()),
        },
        ("Microsoft-Windows-WER-SystemErrorReporting", 1001) => Some(format!("The computer has rebooted from a bugcheck ({}).", first(&["BugcheckCode", "param1"]))),
        ("Application Error", 1000) => Some(format!("Faulting application {}, faulting module {}.", first(&["AppName", "param1"]), first(&["ModuleName", "param4"]))),
        ("Application Hang", 1002) => Some(format!("The program {} stopped interacting with Windows.", first(&["AppName", "param1"]))),
        _ => None,
    }
}
