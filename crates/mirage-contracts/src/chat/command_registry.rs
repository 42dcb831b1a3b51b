#[derive(Clone, Copy, Debug)]
pub(crate) struct CommandSpec {
    pub command: &'static str,
    pub action: &'static str,
}

pub(crate) const RAW_ARG_COMMANDS: &[CommandSpec] = &[
    CommandSpec {
        command: "model",
        action: "set_model",
    },
    CommandSpec {
        command: "provider",
        action: "set_provider",
    },
    CommandSpec {
        command: "negative",
        action: "set_negative_prompt",
    },
    CommandSpec {
        command: "video",
        action: "generate_video",
    },
];

pub(crate) const SETTING_COMMANDS: &[CommandSpec] = &[
    CommandSpec {
        command: "steps",
        action: "set_steps",
    },
    CommandSpec {
        command: "width",
        action: "set_width",
    },
    CommandSpec {
        command: "height",
        action: "set_height",
    },
    CommandSpec {
        command: "guidance",
        action: "set_guidance",
    },
    CommandSpec {
        command: "seed",
        action: "set_seed",
    },
];

pub(crate) const PATH_ARG_COMMANDS: &[CommandSpec] = &[CommandSpec {
    command: "save",
    action: "save_artifact",
}];

pub(crate) const NO_ARG_COMMANDS: &[CommandSpec] = &[
    CommandSpec {
        command: "gallery",
        action: "show_gallery",
    },
    CommandSpec {
        command: "clear",
        action: "clear_gallery",
    },
    CommandSpec {
        command: "status",
        action: "show_status",
    },
    CommandSpec {
        command: "models",
        action: "list_models",
    },
    CommandSpec {
        command: "help",
        action: "help",
    },
    CommandSpec {
        command: "quit",
        action: "quit",
    },
    CommandSpec {
        command: "exit",
        action: "quit",
    },
];

pub const CHAT_HELP_COMMANDS: &[&str] = &[
    "/model <id>",
    "/provider <name>",
    "/negative <text>",
    "/steps <n>",
    "/width <px>",
    "/height <px>",
    "/guidance <x>",
    "/seed <n|-1>",
    "/video <prompt>",
    "/gallery",
    "/clear",
    "/save [path]",
    "/status",
    "/models",
    "/help",
    "/quit",
];
