//! Blocking HTTP backend: every request is a form POST to the session URL.

use std::io::Read;
use std::time::Duration;

use profview_core::{Backend, FetchError};
use profview_protocol::Request;
use tracing::debug;

pub struct HttpBackend {
    server: String,
    agent: ureq::Agent,
}

impl HttpBackend {
    pub fn new(server: impl Into<String>) -> Self {
        let agent = ureq::AgentBuilder::new()
            .timeout_connect(Duration::from_secs(5))
            .timeout(Duration::from_secs(120))
            .build();
        Self {
            server: server.into(),
            agent,
        }
    }
}

impl Backend for HttpBackend {
    fn post(&mut self, session: &str, request: &Request) -> Result<String, FetchError> {
        let url = Request::url(&self.server, session);
        let fields = request.form_fields();
        let form: Vec<(&str, &str)> = fields.iter().map(|(k, v)| (*k, v.as_str())).collect();
        debug!(%url, ?form, "POST");

        match self.agent.post(&url).send_form(&form) {
            // into_string() caps bodies at 10 MB; flame graph sets can exceed that
            Ok(response) => {
                let mut body = String::new();
                response
                    .into_reader()
                    .read_to_string(&mut body)
                    .map_err(|err| FetchError::Transport(err.to_string()))?;
                Ok(body)
            }
            Err(ureq::Error::Status(code, _)) => Err(FetchError::Status(code)),
            Err(ureq::Error::Transport(err)) => Err(FetchError::Transport(err.to_string())),
        }
    }
}
