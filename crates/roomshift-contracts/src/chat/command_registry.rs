#[derive(Clone, Copy, Debug)]
pub(crate) struct CommandSpec {
    pub command: &'static str,
    pub action: &'static str,
    /// Key the argument is stored under in `Intent::command_args`.
    pub arg_key: &'static str,
}

/// Commands whose argument is free text, kept verbatim.
pub(crate) const RAW_ARG_COMMANDS: &[CommandSpec] = &[
    CommandSpec {
        command: "refine",
        action: "refine",
        arg_key: "prompt",
    },
    CommandSpec {
        command: "select",
        action: "select",
        arg_key: "target",
    },
    CommandSpec {
        command: "preset",
        action: "apply_preset",
        arg_key: "index",
    },
];

/// Commands taking one (possibly quoted) path.
pub(crate) const SINGLE_PATH_COMMANDS: &[CommandSpec] = &[
    CommandSpec {
        command: "open",
        action: "open_image",
        arg_key: "path",
    },
    CommandSpec {
        command: "download",
        action: "download",
        arg_key: "path",
    },
];

pub(crate) const NO_ARG_COMMANDS: &[CommandSpec] = &[
    CommandSpec {
        command: "history",
        action: "history",
        arg_key: "",
    },
    CommandSpec {
        command: "status",
        action: "status",
        arg_key: "",
    },
    CommandSpec {
        command: "presets",
        action: "presets",
        arg_key: "",
    },
    CommandSpec {
        command: "reset",
        action: "reset",
        arg_key: "",
    },
    CommandSpec {
        command: "new",
        action: "reset",
        arg_key: "",
    },
    CommandSpec {
        command: "help",
        action: "help",
        arg_key: "",
    },
    CommandSpec {
        command: "quit",
        action: "quit",
        arg_key: "",
    },
    CommandSpec {
        command: "exit",
        action: "quit",
        arg_key: "",
    },
];

pub const CHAT_HELP_COMMANDS: &[&str] = &[
    "/open <path>",
    "/refine <instruction>",
    "/presets",
    "/preset <n>",
    "/select <n|id>",
    "/history",
    "/status",
    "/download [dir]",
    "/reset",
    "/help",
    "/quit",
];
