use crate::render::Converter;

#[derive(Clone)]
pub(crate) struct ServerState {
    pub(crate) converter: Converter,
}
