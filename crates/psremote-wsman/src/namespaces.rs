//! Namespace and URI constants for the WinRM remote shell.

pub const SOAP_ENVELOPE: &str = "http://www.w3.org/2003/05/soap-envelope";
pub const WS_ADDRESSING: &str = "http://schemas.xmlsoap.org/ws/2004/08/addressing";
pub const WS_MANAGEMENT: &str = "http://schemas.dmtf.org/wbem/wsman/1/wsman.xsd";
pub const MS_WS_MANAGEMENT: &str = "http://schemas.microsoft.com/wbem/wsman/1/wsman.xsd";
pub const WINDOWS_SHELL: &str = "http://schemas.microsoft.com/wbem/wsman/1/windows/shell";
pub const POWERSHELL: &str = "http://schemas.microsoft.com/powershell";

pub const ANONYMOUS_ADDRESS: &str =
    "http://schemas.xmlsoap.org/ws/2004/08/addressing/role/anonymous";
pub const POWERSHELL_RESOURCE_URI: &str =
    "http://schemas.microsoft.com/powershell/Microsoft.PowerShell";

/// The PSRP spelling of the control-C signal code.
pub const SIGNAL_CTRL_C: &str = "powershell/signal/crtl_c";
