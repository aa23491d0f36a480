use serde::Serialize;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OptionKind {
    String,
    Integer,
    Boolean,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct OptionSchema {
    pub name: &'static str,
    pub description: &'static str,
    pub kind: OptionKind,
    pub required: bool,
}

impl OptionSchema {
    pub const fn required(name: &'static str, description: &'static str, kind: OptionKind) -> Self {
        Self { name, description, kind, required: true }
    }

    pub const fn optional(name: &'static str, description: &'static str, kind: OptionKind) -> Self {
        Self { name, description, kind, required: false }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct SubcommandSchema {
    pub name: &'static str,
    pub description: &'static str,
    pub options: Vec<OptionSchema>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct CommandSchema {
    pub name: &'static str,
    pub description: &'static str,
    pub options: Vec<OptionSchema>,
    pub subcommands: Vec<SubcommandSchema>,
}

impl CommandSchema {
    pub fn new(name: &'static str, description: &'static str) -> Self {
        Self { name, description, options: Vec::new(), subcommands: Vec::new() }
    }

    pub fn option(mut self, option: OptionSchema) -> Self {
        self.options.push(option);
        self
    }

    pub fn subcommand(
        mut self,
        name: &'static str,
        description: &'static str,
        options: Vec<OptionSchema>,
    ) -> Self {
        self.subcommands.push(SubcommandSchema { name, description, options });
        self
    }

    pub fn find_subcommand(&self, name: &str) -> Option<&SubcommandSchema> {
        self.subcommands.iter().find(|subcommand| subcommand.name == name)
    }

    /// Required options first; the platform rejects schemas that interleave them.
    pub fn validate(&self) -> Result<(), String> {
        let check = |owner: &str, options: &[OptionSchema]| {
            let first_optional = options.iter().position(|option| !option.required);
            match first_optional {
                Some(index) if options[index..].iter().any(|option| option.required) => {
                    Err(format!("`{owner}` declares a required option after an optional one"))
                }
                _ => Ok(()),
            }
        };

        if !self.options.is_empty() && !self.subcommands.is_empty() {
            return Err(format!("`{}` mixes options and subcommands", self.name));
        }
        check(self.name, &self.options)?;
        for subcommand in &self.subcommands {
            check(subcommand.name, &subcommand.options)?;
        }
        Ok(())
    }
}
