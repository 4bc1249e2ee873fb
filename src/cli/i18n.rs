//! English and Chinese CLI strings.

use clap::ValueEnum;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum Lang {
    #[default]
    En,
    Zh,
}

impl Lang {
    /// `--lang` wins; otherwise `LANG`, then `LC_ALL`, starting with `zh`.
    pub fn resolve(explicit: Option<Lang>) -> Lang {
        if let Some(lang) = explicit {
            return lang;
        }
        let env = ["LANG", "LC_ALL"]
            .iter()
            .filter_map(|k| std::env::var(k).ok())
            .find(|v| !v.is_empty());
        Self::from_locale(env.as_deref())
    }

    pub fn from_locale(locale: Option<&str>) -> Lang {
        match locale {
            Some(l) if l.to_lowercase().starts_with("zh") => Lang::Zh,
            _ => Lang::En,
        }
    }

    pub fn strings(self) -> &'static Strings {
        match self {
            Lang::En => &EN,
            Lang::Zh => &ZH,
        }
    }
}

pub struct Strings {
    pub header: &'static str,
    pub cmd_status: &'static str,
    pub cmd_detect: &'static str,
    pub cmd_connect: &'static str,
    pub cmd_disconnect: &'static str,
    pub cmd_help: &'static str,
    pub commands: &'static str,
    pub options: &'static str,
    pub examples: &'static str,
    pub opt_password: &'static str,
    pub opt_lang: &'static str,

    pub adapter: &'static str,
    pub name: &'static str,
    pub mac: &'static str,
    pub kind: &'static str,
    pub status_label: &'static str,
    pub upstream: &'static str,
    pub traffic: &'static str,

    pub connected: &'static str,
    pub not_connected: &'static str,
    pub partially_connected: &'static str,

    pub no_adapter: &'static str,
    pub please_connect: &'static str,
    pub adapter_found: &'static str,
    pub details: &'static str,
    pub interface: &'static str,
    pub chip: &'static str,
    pub upstream_network: &'static str,
    pub no_upstream: &'static str,

    pub scanning: &'static str,
    pub troubleshooting: &'static str,
    pub troubleshooting_steps: [&'static str; 3],

    pub detecting_adapter: &'static str,
    pub found_adapter: &'static str,
    pub found_upstream: &'static str,
    pub ensure_internet: &'static str,

    pub password_required: &'static str,
    pub password_prompt: &'static str,
    pub cancelled: &'static str,

    pub configuring_network: &'static str,
    pub setting_static_ip: &'static str,
    pub sharing_enabled: &'static str,
    pub rm01_can_access: &'static str,
    pub auth_failed: &'static str,
    pub timed_out: &'static str,
    pub failed_to_enable: &'static str,

    pub disconnecting: &'static str,
    pub no_active_connection: &'static str,
    pub sharing_disabled: &'static str,
    pub failed_to_disable: &'static str,

    pub ip_forwarding_disabled: &'static str,
    pub interrupted: &'static str,
}

pub static EN: Strings = Strings {
    header: "RM-01 Internet Connector - CLI",
    cmd_status: "Show current connection status",
    cmd_detect: "Detect RM-01 adapter",
    cmd_connect: "Enable internet sharing to RM-01",
    cmd_disconnect: "Disable internet sharing",
    cmd_help: "Show this help message",
    commands: "Commands",
    options: "Options",
    examples: "Examples",
    opt_password: "Administrator password (prompted for when omitted)",
    opt_lang: "Language (en, zh)",

    adapter: "Adapter",
    name: "Name",
    mac: "MAC",
    kind: "Type",
    status_label: "Status",
    upstream: "Upstream",
    traffic: "Traffic",

    connected: "Connected",
    not_connected: "Not Connected",
    partially_connected: "Partially Connected",

    no_adapter: "No RM-01 adapter (AX88179A) detected",
    please_connect: "Please connect RM-01 via USB",
    adapter_found: "RM-01 adapter found!",
    details: "Details",
    interface: "Interface",
    chip: "Chip",
    upstream_network: "Upstream Network",
    no_upstream: "No upstream network found (Wi-Fi/Ethernet)",

    scanning: "Scanning for AX88179A USB Ethernet adapter...",
    troubleshooting: "Troubleshooting",
    troubleshooting_steps: [
        "Make sure RM-01 is connected via USB",
        "Check 'lsusb | grep -i asix' for the device",
        "Check 'ip link show' for network interfaces",
    ],

    detecting_adapter: "Detecting RM-01 adapter...",
    found_adapter: "Found adapter",
    found_upstream: "Found upstream",
    ensure_internet: "Please ensure your computer has internet access",

    password_required: "Administrator password required for network configuration",
    password_prompt: "Password",
    cancelled: "Cancelled",

    configuring_network: "Configuring network...",
    setting_static_ip: "Setting static IP",
    sharing_enabled: "Internet sharing enabled!",
    rm01_can_access: "RM-01 can now access the internet through this computer.",
    auth_failed: "Authentication failed - incorrect password",
    timed_out: "Network configuration took too long",
    failed_to_enable: "Failed to enable sharing",

    disconnecting: "Disconnecting",
    no_active_connection: "No active connection found",
    sharing_disabled: "Internet sharing disabled",
    failed_to_disable: "Failed to disable sharing",

    ip_forwarding_disabled: "IP forwarding is disabled",
    interrupted: "Interrupted",
};

pub static ZH: Strings = Strings {
    header: "RM-01 互联网连接助手 - 命令行模式",
    cmd_status: "显示当前连接状态",
    cmd_detect: "检测 RM-01 设备",
    cmd_connect: "启用网络共享给 RM-01",
    cmd_disconnect: "禁用网络共享",
    cmd_help: "显示此帮助信息",
    commands: "命令",
    options: "选项",
    examples: "示例",
    opt_password: "管理员密码（省略时会提示输入）",
    opt_lang: "语言 (en, zh)",

    adapter: "适配器",
    name: "名称",
    mac: "MAC 地址",
    kind: "类型",
    status_label: "状态",
    upstream: "上游网络",
    traffic: "流量",

    connected: "已连接",
    not_connected: "未连接",
    partially_connected: "部分连接",

    no_adapter: "未检测到 RM-01 适配器 (AX88179A)",
    please_connect: "请通过 USB 连接 RM-01",
    adapter_found: "找到 RM-01 适配器！",
    details: "详细信息",
    interface: "网络接口",
    chip: "芯片",
    upstream_network: "上游网络",
    no_upstream: "未找到上游网络 (Wi-Fi/有线网络)",

    scanning: "正在扫描 AX88179A USB 网卡...",
    troubleshooting: "故障排除",
    troubleshooting_steps: [
        "确保 RM-01 已通过 USB 连接",
        "检查 'lsusb | grep -i asix' 查看设备",
        "检查 'ip link show' 查看网络接口",
    ],

    detecting_adapter: "正在检测 RM-01 适配器...",
    found_adapter: "找到适配器",
    found_upstream: "找到上游网络",
    ensure_internet: "请确保您的电脑已连接到互联网",

    password_required: "需要管理员密码来配置网络",
    password_prompt: "密码",
    cancelled: "已取消",

    configuring_network: "正在配置网络...",
    setting_static_ip: "设置静态 IP",
    sharing_enabled: "网络共享已启用！",
    rm01_can_access: "RM-01 现在可以通过此电脑访问互联网。",
    auth_failed: "认证失败 - 密码错误",
    timed_out: "网络配置超时",
    failed_to_enable: "启用共享失败",

    disconnecting: "正在断开连接",
    no_active_connection: "未找到活动连接",
    sharing_disabled: "网络共享已禁用",
    failed_to_disable: "禁用共享失败",

    ip_forwarding_disabled: "IP 转发已禁用",
    interrupted: "已中断",
};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_locale_detection() {
        assert_eq!(Lang::from_locale(Some("zh_CN.UTF-8")), Lang::Zh);
        assert_eq!(Lang::from_locale(Some("en_US.UTF-8")), Lang::En);
        assert_eq!(Lang::from_locale(Some("C")), Lang::En);
        assert_eq!(Lang::from_locale(None), Lang::En);
    }

    #[test]
    fn test_explicit_lang_wins() {
        assert_eq!(Lang::resolve(Some(Lang::Zh)), Lang::Zh);
        assert_eq!(Lang::resolve(Some(Lang::En)), Lang::En);
    }

    #[test]
    fn test_tables_differ() {
        assert_ne!(Lang::En.strings().connected, Lang::Zh.strings().connected);
    }
}
