use axum::response::Html;
use handlebars::Handlebars;
use serde::Serialize;

use crate::error::AppError;

pub const INDEX: &str = "index";
pub const UPDATE: &str = "update";

/// Named HTML templates, compiled once at startup.
pub struct Views {
    registry: Handlebars<'static>,
}

impl Views {
    pub fn new() -> anyhow::Result<Self> {
        let mut registry = Handlebars::new();
        registry.set_strict_mode(false);
        registry.register_partial("layout", include_str!("../templates/layout.hbs"))?;
        registry.register_partial("user_form", include_str!("../templates/user_form.hbs"))?;
        registry.register_template_string(INDEX, include_str!("../templates/index.hbs"))?;
        registry.register_template_string(UPDATE, include_str!("../templates/update.hbs"))?;
        Ok(Self { registry })
    }

    pub fn render<T: Serialize>(&self, name: &str, data: &T) -> Result<Html<String>, AppError> {
        Ok(Html(self.registry.render(name, data)?))
    }
}
